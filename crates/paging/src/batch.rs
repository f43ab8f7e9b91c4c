use floe_core::model::DeviceClass;

/// Adaptive batch size as a pure function of how much history is already
/// loaded. Early pages are larger so scrolling feels populated quickly;
/// once a room holds plenty of history the size tapers off to avoid
/// over-fetching. Constrained devices cap every page at the first-load
/// size.
pub fn batch_size(loaded_count: usize, device: DeviceClass) -> u32 {
    let size = if loaded_count == 0 {
        20
    } else if loaded_count < 50 {
        30
    } else if loaded_count < 200 {
        25
    } else {
        20
    };

    match device {
        DeviceClass::Standard => size,
        DeviceClass::Constrained => size.min(20),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tiers() {
        assert_eq!(batch_size(0, DeviceClass::Standard), 20);
        assert_eq!(batch_size(1, DeviceClass::Standard), 30);
        assert_eq!(batch_size(40, DeviceClass::Standard), 30);
        assert_eq!(batch_size(49, DeviceClass::Standard), 30);
        assert_eq!(batch_size(50, DeviceClass::Standard), 25);
        assert_eq!(batch_size(199, DeviceClass::Standard), 25);
        assert_eq!(batch_size(200, DeviceClass::Standard), 20);
        assert_eq!(batch_size(220, DeviceClass::Standard), 20);
    }

    #[test]
    fn constrained_devices_cap_at_twenty() {
        assert_eq!(batch_size(0, DeviceClass::Constrained), 20);
        assert_eq!(batch_size(40, DeviceClass::Constrained), 20);
        assert_eq!(batch_size(100, DeviceClass::Constrained), 20);
        assert_eq!(batch_size(500, DeviceClass::Constrained), 20);
    }
}
