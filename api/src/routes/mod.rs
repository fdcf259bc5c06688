pub mod chat_mode;
pub mod health;
pub mod homes;
pub mod interventions;
pub mod recommendations;
pub mod systems;
