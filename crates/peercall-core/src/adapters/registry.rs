//! Session registry: hands out session identities and maps them to
//! connections. Shared by the QUIC relay server and the loopback relay.

use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::domain::identity::SessionId;

/// Length of generated session identities.
pub const SESSION_ID_LEN: usize = 12;

/// Maps live session identities to a per-connection handle `C`.
pub struct SessionRegistry<C> {
    sessions: HashMap<SessionId, C>,
}

impl<C> SessionRegistry<C> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Allocate a fresh identity and store the connection built for it.
    pub fn register(&mut self, make: impl FnOnce(SessionId) -> C) -> SessionId {
        let id = self.fresh_id();
        let conn = make(id.clone());
        self.sessions.insert(id.clone(), conn);
        id
    }

    pub fn get(&self, id: &SessionId) -> Option<&C> {
        self.sessions.get(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<C> {
        self.sessions.remove(id)
    }

    /// Every session except `id`.
    pub fn others<'a>(&'a self, id: &'a SessionId) -> impl Iterator<Item = (&'a SessionId, &'a C)> {
        self.sessions.iter().filter(move |(other, _)| *other != id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn fresh_id(&self) -> SessionId {
        let mut rng = rand::thread_rng();
        loop {
            let token: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(SESSION_ID_LEN)
                .map(char::from)
                .collect();
            let id = SessionId(token);
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

impl<C> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_unique_ids() {
        let mut registry = SessionRegistry::new();
        let ids: Vec<_> = (0..100).map(|n| registry.register(|_| n)).collect();

        assert_eq!(registry.len(), 100);
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        assert!(ids
            .iter()
            .all(|id| id.as_str().len() == SESSION_ID_LEN
                && id.as_str().chars().all(|c| c.is_ascii_alphanumeric())));
    }

    #[test]
    fn connection_is_built_with_its_own_id() {
        let mut registry = SessionRegistry::new();
        let id = registry.register(|id| id.to_string());
        assert_eq!(registry.get(&id), Some(&id.to_string()));
    }

    #[test]
    fn remove_and_others() {
        let mut registry = SessionRegistry::new();
        let a = registry.register(|_| "a");
        let b = registry.register(|_| "b");
        let c = registry.register(|_| "c");

        let mut others: Vec<_> = registry.others(&a).map(|(_, conn)| *conn).collect();
        others.sort();
        assert_eq!(others, vec!["b", "c"]);

        assert_eq!(registry.remove(&b), Some("b"));
        assert_eq!(registry.remove(&b), None);
        assert!(registry.get(&b).is_none());
        assert_eq!(registry.others(&c).count(), 1);

        registry.remove(&a);
        registry.remove(&c);
        assert!(registry.is_empty());
    }
}
