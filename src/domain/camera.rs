use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraId { pub path: String }

impl CameraId {
    pub fn from_index(index: u32) -> Self {
        Self { path: format!("/dev/video{}", index) }
    }

    /// Trailing device number of `/dev/videoN`, if any.
    pub fn index(&self) -> Option<u32> {
        self.path.strip_prefix("/dev/video")?.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: CameraId,
    pub name: String,
    pub card: String,
    pub driver: String,
    pub bus: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_through_device_path() {
        let id = CameraId::from_index(2);
        assert_eq!(id.path, "/dev/video2");
        assert_eq!(id.index(), Some(2));
        assert_eq!(CameraId { path: "/dev/media0".into() }.index(), None);
    }
}
