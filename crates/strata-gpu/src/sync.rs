//! Synchronization primitives.

use crate::error::{GpuError, Result};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Recording state of a render-pass component's command buffer.
///
/// The transitions mirror the per-frame protocol: a command buffer may only
/// be re-recorded once the previous submission's fence has been observed.
/// The state rules are a plain value type so they hold without a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// No recording in flight; safe to begin.
    Idle,
    /// Commands are being recorded this frame.
    Recording,
    /// Submitted to a queue; the fence has not been observed yet.
    Submitted,
}

impl RecordState {
    /// Transition into Recording.
    ///
    /// Legal from Idle (first frame) and from Submitted (the caller has just
    /// waited on the pass fence). Re-entering while already Recording is a
    /// protocol violation.
    pub fn begin(&mut self) -> Result<()> {
        match self {
            Self::Recording => Err(GpuError::InvalidState(
                "command buffer re-recorded before submission".to_string(),
            )),
            Self::Idle | Self::Submitted => {
                *self = Self::Recording;
                Ok(())
            }
        }
    }

    /// Transition into Submitted. Legal only while Recording.
    pub fn submit(&mut self) -> Result<()> {
        match self {
            Self::Recording => {
                *self = Self::Submitted;
                Ok(())
            }
            _ => Err(GpuError::InvalidState(
                "submit without an open recording".to_string(),
            )),
        }
    }
}

/// Per-pass synchronization: fence, completion semaphore, and the recording
/// state machine.
///
/// One `PassSync` per render-pass component guarantees at most one in-flight
/// use of that component's command buffer: `begin_frame` blocks on the fence
/// from the previous submission before the caller may re-record.
pub struct PassSync {
    /// Signaled when this pass's previous submission completes.
    pub fence: vk::Fence,
    /// Signaled by this pass's submission; waited on by the next stage.
    pub complete: vk::Semaphore,
    state: RecordState,
}

impl PassSync {
    /// Create pass synchronization resources.
    ///
    /// The fence starts signaled so the first `begin_frame` does not block.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            fence: create_fence(device, true)?,
            complete: create_semaphore(device)?,
            state: RecordState::Idle,
        })
    }

    /// Wait for the previous submission and open a new recording.
    ///
    /// Blocks (no timeout) until the GPU has finished the previous use of
    /// this pass's command buffer, then resets the fence.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn begin_frame(&mut self, device: &ash::Device) -> Result<()> {
        self.state.begin()?;
        wait_for_fence(device, self.fence, u64::MAX)?;
        reset_fence(device, self.fence)?;
        Ok(())
    }

    /// Mark the recording as submitted. Call immediately after queue submit.
    pub fn submitted(&mut self) -> Result<()> {
        self.state.submit()
    }

    /// Current recording state.
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.complete, None);
        device.destroy_fence(self.fence, None);
    }
}

/// Frame synchronization resources for swapchain presentation.
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
        })
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
    }
}

/// Manages synchronization for multiple frames in flight.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    current_frame: usize,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frame_syncs.push(FrameSync::new(device)?);
        }

        Ok(Self {
            frame_syncs,
            current_frame: 0,
        })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.current_frame]
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.frame_syncs.len();
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.frame_syncs {
            sync.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_state_happy_path() {
        let mut state = RecordState::Idle;
        assert!(state.begin().is_ok());
        assert_eq!(state, RecordState::Recording);
        assert!(state.submit().is_ok());
        assert_eq!(state, RecordState::Submitted);
        // Next frame: the caller waits on the fence, then re-begins.
        assert!(state.begin().is_ok());
        assert_eq!(state, RecordState::Recording);
    }

    #[test]
    fn record_state_rejects_double_begin() {
        let mut state = RecordState::Idle;
        state.begin().unwrap();
        assert!(state.begin().is_err());
    }

    #[test]
    fn record_state_rejects_submit_without_recording() {
        let mut state = RecordState::Idle;
        assert!(state.submit().is_err());

        let mut state = RecordState::Submitted;
        assert!(state.submit().is_err());
    }
}
