// The messaging module is the inbox front-end.
// It classifies unread mail and hands each intent to a core service.

#[path = "inbox/intents.rs"]
pub mod intents;

#[path = "inbox/dispatcher.rs"]
pub mod dispatcher;

pub use dispatcher::InboxDispatcher;
