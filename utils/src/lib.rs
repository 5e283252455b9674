pub mod audio;
pub mod capture;
pub mod device;
