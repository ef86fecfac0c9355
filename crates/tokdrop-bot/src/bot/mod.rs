mod context;
mod dispatch;

pub(crate) use context::BotContext;
pub(crate) use dispatch::dispatch_message;
