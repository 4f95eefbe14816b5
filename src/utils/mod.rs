pub mod addr;
pub mod validation;

pub use addr::Mailbox;
pub use validation::{EmailAddress, EmailValidator};
