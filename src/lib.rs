extern crate nalgebra as na;

pub mod config;
pub mod cost;
pub mod dynamics;
pub mod error;
pub mod ilqr;
pub mod pnqp;
pub mod render;
pub mod sim;
pub mod skidsteer;
pub mod video;
