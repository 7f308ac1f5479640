pub mod health;
pub mod indictment;
