pub mod camera;
pub mod centerline;
pub mod config;
pub mod detector;
pub mod geometry;
pub mod mat;
pub mod motor;
pub mod obstacle;
pub mod perception;
pub mod pid;
pub mod pipeline;
pub mod segmentation;
