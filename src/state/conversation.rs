mod core;
mod history;
mod state;
mod streaming;
mod tools;


pub use state::{ConversationStreamController, TurnOutcome, TurnPhase, UserInput};
pub use streaming::{ChatEventReducer, TurnEffect};
