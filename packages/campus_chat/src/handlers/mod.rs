pub mod admin;
pub mod chat;
pub mod health;
pub mod users;

// Re-export all handlers for easy route registration
pub use admin::{clear_all_handler, get_database_stats};
pub use chat::{
    chat_history_handler, chat_websocket_handler, get_chat_message_handler, online_users_handler,
    user_presence_handler,
};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use users::{get_user_handler, put_user_handler};
