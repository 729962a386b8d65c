use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;

/// Signals for one frame in flight.
pub struct FrameSync {
    /// Signaled by the presentation engine when the acquired image is
    /// actually usable; waited on by the compute submission.
    pub acquire: vk::Semaphore,

    /// Signaled by the graphics submission; waited on by the present call.
    pub present: vk::Semaphore,

    /// Signaled when all of this frame's GPU work has finished. Created
    /// signaled so the first use of the slot does not stall.
    pub in_flight: vk::Fence,
}

/// Responsibilities:
/// - Own one signal set per frame in flight
/// - Refuse to hand out a slot whose signals the GPU has not retired yet
pub struct RenderFrameContext {
    frames: Vec<FrameSync>,
    current: usize,
}

/// Slot index for the frame after `current`.
fn next_slot(current: usize, frame_count: usize) -> usize {
    (current + 1) % frame_count
}

impl RenderFrameContext {
    pub fn new(dev: &RenderDevice, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(eyre!("frames_in_flight must be at least 1"));
        }

        let frames = (0..frames_in_flight)
            .map(|_| {
                let acquire = unsafe {
                    dev.logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
                };
                let present = unsafe {
                    dev.logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
                };
                let in_flight = unsafe {
                    dev.logical.create_fence(
                        &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                        None,
                    )?
                };
                Ok(FrameSync { acquire, present, in_flight })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            frames,
            current: 0,
        })
    }

    pub fn slot(&self) -> usize {
        self.current
    }

    /// Wait until the current slot's previous frame has fully retired, then
    /// hand out its signal set. The fence is reset by the submission that
    /// repays it, not here, so a skipped frame leaves the slot reusable.
    pub fn begin_frame(&self, dev: &RenderDevice) -> Result<&FrameSync> {
        let frame = &self.frames[self.current];
        unsafe {
            dev.logical.wait_for_fences(&[frame.in_flight], true, u64::MAX)?;
        }
        Ok(frame)
    }

    /// Advance to the next slot. Only called after a frame was actually
    /// submitted; skipped frames reuse their untouched slot.
    pub fn advance(&mut self) {
        self.current = next_slot(self.current, self.frames.len());
    }

    pub fn destroy(&mut self, dev: &RenderDevice) {
        unsafe {
            for frame in self.frames.drain(..) {
                dev.logical.destroy_semaphore(frame.acquire, None);
                dev.logical.destroy_semaphore(frame.present, None);
                dev.logical.destroy_fence(frame.in_flight, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_rotate_cyclically() {
        let visited: Vec<usize> = (0..7)
            .scan(0usize, |slot, _| {
                let here = *slot;
                *slot = next_slot(*slot, 3);
                Some(here)
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_slot_always_reuses_itself() {
        assert_eq!(next_slot(0, 1), 0);
    }
}
