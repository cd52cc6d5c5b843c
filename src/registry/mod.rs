//! On-chain agent registry: call encoding, the registration protocol, and
//! the trigger that runs it off the host agent's startup path.

pub mod abi;
pub mod error;
pub mod registrar;
pub mod trigger;

pub use error::{Phase, RegistrationError};
pub use registrar::{Registrar, RegistrarOptions, RegistrationOutcome, lookup_registration};
pub use trigger::{RegistrationTask, RegistrationTrigger, run_attempt};
