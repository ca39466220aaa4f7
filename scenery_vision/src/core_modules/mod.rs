pub mod frame;
pub mod frame_buffer;
pub mod pixel;
pub mod region;
pub mod region_detector;
pub mod timing;
pub mod track_filter;
pub mod tracker;
pub mod transform;
pub mod vision;

#[cfg(feature = "opencv")]
pub mod opencv_vision;
