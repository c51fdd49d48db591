pub mod call_loop;
pub mod call_machine;
pub mod input;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;
