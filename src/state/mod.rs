mod conversation;

pub use conversation::{
    ChatEventReducer, ConversationStreamController, TurnEffect, TurnOutcome, TurnPhase, UserInput,
};
