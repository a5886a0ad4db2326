//! AT command handling: the quote-aware tokenizer and the responder that
//! turns session state into protocol replies.

pub mod parser;
pub mod responder;

pub use parser::{AtArg, AtCommandType};
pub use responder::{AtResponder, ClccOutcome, VendorCommandHit};
