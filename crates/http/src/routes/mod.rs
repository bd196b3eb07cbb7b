pub mod apps;
pub mod events;
pub mod vapid;
