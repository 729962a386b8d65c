use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family: QueueFamily,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family,
            handle,
        }
    }
}

#[derive(Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
    supports_present: bool,
}

impl QueueFamily {
    pub fn new(
        index: u32,
        properties: vk::QueueFamilyProperties,
        supports_present: bool
    ) -> Self {
        Self {
            index,
            properties,
            supports_present,
        }
    }

    pub fn supports_present(&self) -> bool {
        self.supports_present
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }
}

impl PartialEq for QueueFamily {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for QueueFamily {}

/// Queue-family indices the renderer submits through. Resolved once during
/// device creation and never changed afterwards. Families may alias on
/// hardware that exposes a single do-everything family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAssignment {
    pub compute: u32,
    pub graphics: u32,
    pub present: u32,
}

impl QueueAssignment {
    /// All distinct families, in first-use order.
    pub fn distinct_families(&self) -> Vec<u32> {
        let mut families = vec![self.compute];
        if !families.contains(&self.graphics) {
            families.push(self.graphics);
        }
        if !families.contains(&self.present) {
            families.push(self.present);
        }
        families
    }

    /// Families that record command buffers (present only hands images to
    /// the display engine).
    pub fn recording_families(&self) -> Vec<u32> {
        let mut families = vec![self.compute];
        if !families.contains(&self.graphics) {
            families.push(self.graphics);
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_families_dedups_aliases() {
        let assignment = QueueAssignment { compute: 0, graphics: 0, present: 0 };
        assert_eq!(assignment.distinct_families(), vec![0]);
        assert_eq!(assignment.recording_families(), vec![0]);
    }

    #[test]
    fn distinct_families_preserves_first_use_order() {
        let assignment = QueueAssignment { compute: 2, graphics: 0, present: 1 };
        assert_eq!(assignment.distinct_families(), vec![2, 0, 1]);
        assert_eq!(assignment.recording_families(), vec![2, 0]);
    }

    #[test]
    fn present_aliasing_graphics_records_nothing_extra() {
        let assignment = QueueAssignment { compute: 1, graphics: 0, present: 0 };
        assert_eq!(assignment.distinct_families(), vec![1, 0]);
        assert_eq!(assignment.recording_families(), vec![1, 0]);
    }
}
