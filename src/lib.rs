//! Object-detection dashboard: still images and webcam frames run through an
//! ONNX YOLO model, annotated results saved to disk and served over HTTP.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;

#[cfg(test)]
mod test_support;
