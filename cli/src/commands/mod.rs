pub mod admin;
pub mod chat_mode;
pub mod forecast;
pub mod health;
pub mod home;
pub mod intervention;
pub mod recommendations;
pub mod system;
