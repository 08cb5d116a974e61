pub mod env;
pub mod os;
pub mod telemetry;

#[cfg(test)]
pub mod test;
