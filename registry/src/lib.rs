mod poller;
mod registry;

pub use registry::{QueryRegistry, RegistryError};
