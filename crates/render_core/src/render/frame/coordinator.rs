//! Frames-in-flight state machine
//!
//! Each frame slot owns a fence and a pair of semaphores. A slot's command
//! buffer is only re-recorded once its previous submission's fence signals,
//! and a swapchain image is only reused once the fence of the frame that last
//! rendered to it signals.

use crate::render::api::*;

/// Stage of the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between frames
    Ready,
    /// Command buffer open, no pass active
    Recording,
    /// A render pass is active
    InPass,
    /// Command buffer closed, not yet submitted
    RecordingEnded,
    /// Submitted, not yet presented
    Submitted,
    /// A swapchain rebuild is pending; frames are skipped until it succeeds
    RecreatingSwapchain,
}

/// Synchronisation objects of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSync {
    /// Signalled when the acquired image is ready to be rendered to
    pub image_available: SemaphoreHandle,
    /// Signalled when the slot's commands finish executing
    pub render_complete: SemaphoreHandle,
    /// Signalled with `render_complete`, waited on by the CPU
    pub in_flight: FenceHandle,
}

impl FrameSync {
    fn create(device: &mut dyn RenderDevice) -> RenderResult<Self> {
        let image_available = device.create_semaphore()?;
        let render_complete = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        match device.create_fence(true) {
            Ok(in_flight) => Ok(Self { image_available, render_complete, in_flight }),
            Err(e) => {
                device.destroy_semaphore(image_available);
                device.destroy_semaphore(render_complete);
                Err(e)
            }
        }
    }

    fn destroy(self, device: &mut dyn RenderDevice) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_complete);
        device.destroy_fence(self.in_flight);
    }
}

/// The frame a successful [`FrameCoordinator::begin_frame`] opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame slot, `0..frames_in_flight`
    pub frame_index: usize,
    /// Acquired swapchain image
    pub image_index: u32,
}

/// Per-frame acquire/submit/present state machine
#[derive(Debug)]
pub struct FrameCoordinator {
    frames_in_flight: usize,
    current_frame: usize,
    image_index: u32,
    state: FrameState,
    sync: Vec<FrameSync>,
    images_in_flight: Vec<Option<FenceHandle>>,
    framebuffer_width: u32,
    framebuffer_height: u32,
    framebuffer_generation: u64,
    swapchain_generation: u64,
    recreate_requested: bool,
    targets_dirty: bool,
    fence_timeout_ns: u64,
}

impl FrameCoordinator {
    /// Create `frames_in_flight` slots against the device's current swapchain
    pub fn new(device: &mut dyn RenderDevice, frames_in_flight: usize) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            log::error!("Frame coordinator needs at least one frame in flight");
            return Err(RenderError::InvalidConfig("frames_in_flight must be greater than 0".to_string()));
        }

        let mut sync = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSync::create(device) {
                Ok(frame) => sync.push(frame),
                Err(e) => {
                    log::error!("Failed to create frame synchronisation objects: {}", e);
                    for frame in sync {
                        frame.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        let (width, height) = device.framebuffer_size();
        let image_count = device.swapchain_image_count() as usize;
        log::info!(
            "Frame coordinator ready: {} frames in flight, {} swapchain images, {}x{}",
            frames_in_flight,
            image_count,
            width,
            height
        );

        Ok(Self {
            frames_in_flight,
            current_frame: 0,
            image_index: 0,
            state: FrameState::Ready,
            sync,
            images_in_flight: vec![None; image_count],
            framebuffer_width: width,
            framebuffer_height: height,
            framebuffer_generation: 0,
            swapchain_generation: 0,
            recreate_requested: false,
            targets_dirty: false,
            fence_timeout_ns: u64::MAX,
        })
    }

    /// Builder-style fence wait timeout
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Record a new framebuffer size; the swapchain is rebuilt on the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.framebuffer_width = width;
        self.framebuffer_height = height;
        self.framebuffer_generation += 1;
        log::debug!("Framebuffer resized to {}x{} (generation {})", width, height, self.framebuffer_generation);
    }

    /// Open the next frame
    ///
    /// Returns `Ok(None)` when the frame must be skipped because the swapchain
    /// is being or was just rebuilt, or the framebuffer has no area.
    pub fn begin_frame(&mut self, device: &mut dyn RenderDevice) -> RenderResult<Option<FrameInfo>> {
        match self.state {
            FrameState::Ready => {}
            FrameState::RecreatingSwapchain => {
                device.wait_idle()?;
                log::debug!("Swapchain recreation pending, skipping frame");
                self.recreate_swapchain(device)?;
                return Ok(None);
            }
            state => {
                return Err(RenderError::InvalidState(format!("begin_frame called in state {state:?}")));
            }
        }

        if self.framebuffer_generation != self.swapchain_generation || self.recreate_requested {
            self.recreate_swapchain(device)?;
            return Ok(None);
        }

        let sync = self.sync[self.current_frame];
        if let Err(e) = device.wait_for_fence(sync.in_flight, self.fence_timeout_ns) {
            log::error!("Wait on in-flight fence of frame {} failed: {}", self.current_frame, e);
            return Err(e);
        }

        let (image_index, status) = match device.acquire_next_image(sync.image_available, u64::MAX) {
            Ok(acquired) => acquired,
            Err(e) => {
                log::error!("Failed to acquire swapchain image: {}", e);
                return Err(e);
            }
        };
        match status {
            SwapchainStatus::OutOfDate => {
                log::warn!("Swapchain out of date on acquire, recreating");
                self.recreate_requested = true;
                self.recreate_swapchain(device)?;
                return Ok(None);
            }
            SwapchainStatus::Suboptimal => {
                log::warn!("Swapchain suboptimal on acquire, recreating next frame");
                self.recreate_requested = true;
            }
            SwapchainStatus::Optimal => {}
        }
        self.image_index = image_index;

        let opened = device
            .begin_commands(self.current_frame)
            .and_then(|()| device.set_viewport(self.framebuffer_width, self.framebuffer_height));
        if let Err(e) = opened {
            log::error!("Failed to begin recording frame {}: {}", self.current_frame, e);
            self.abandon_frame(device, self.current_frame);
            return Err(e);
        }
        self.state = FrameState::Recording;

        log::trace!("Frame {} recording into image {}", self.current_frame, image_index);
        Ok(Some(FrameInfo { frame_index: self.current_frame, image_index }))
    }

    /// Begin a render pass inside the open frame
    pub fn begin_renderpass(
        &mut self,
        device: &mut dyn RenderDevice,
        pass: RenderPassHandle,
        target: RenderTargetHandle,
        area: RenderArea,
    ) -> RenderResult<()> {
        if self.state != FrameState::Recording {
            return Err(RenderError::InvalidState(format!("cannot begin a render pass in state {:?}", self.state)));
        }
        device.begin_renderpass(pass, target, area)?;
        self.state = FrameState::InPass;
        Ok(())
    }

    /// End the active render pass
    pub fn end_renderpass(&mut self, device: &mut dyn RenderDevice, pass: RenderPassHandle) -> RenderResult<()> {
        if self.state != FrameState::InPass {
            return Err(RenderError::InvalidState(format!("no render pass is active (state {:?})", self.state)));
        }
        device.end_renderpass(pass)?;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Close, submit and present the open frame, then advance to the next slot
    ///
    /// A stale swapchain reported by present is rebuilt on the next frame.
    pub fn end_frame(&mut self, device: &mut dyn RenderDevice) -> RenderResult<()> {
        if self.state != FrameState::Recording {
            return Err(RenderError::InvalidState(format!("end_frame called in state {:?}", self.state)));
        }
        let frame = self.current_frame;
        let sync = self.sync[frame];

        if let Err(e) = device.end_commands(frame) {
            log::error!("Failed to end recording of frame {}: {}", frame, e);
            self.abandon_frame(device, frame);
            return Err(e);
        }
        self.state = FrameState::RecordingEnded;

        let image = self.image_index as usize;
        if let Some(Some(fence)) = self.images_in_flight.get(image).copied() {
            if fence != sync.in_flight {
                if let Err(e) = device.wait_for_fence(fence, self.fence_timeout_ns) {
                    log::error!("Wait on fence of swapchain image {} failed: {}", image, e);
                    self.abandon_frame(device, frame);
                    return Err(e);
                }
            }
        }
        if let Some(slot) = self.images_in_flight.get_mut(image) {
            *slot = Some(sync.in_flight);
        }

        if let Err(e) = device.reset_fence(sync.in_flight) {
            log::error!("Failed to reset fence of frame {}: {}", frame, e);
            self.abandon_frame(device, frame);
            return Err(e);
        }
        let submit = SubmitInfo {
            frame,
            wait_semaphore: sync.image_available,
            wait_stage: WaitStage::ColorAttachmentOutput,
            signal_semaphore: sync.render_complete,
            fence: sync.in_flight,
        };
        if let Err(e) = device.submit(&submit) {
            log::error!("Queue submission of frame {} failed: {}", frame, e);
            // An unsubmitted fence would never signal.
            self.replace_fence(device, frame);
            self.abandon_frame(device, frame);
            return Err(e);
        }
        self.state = FrameState::Submitted;

        let presented = device.present(self.image_index, sync.render_complete);
        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        self.state = FrameState::Ready;
        match presented {
            Ok(SwapchainStatus::Optimal) => Ok(()),
            Ok(status) => {
                log::warn!("Swapchain {:?} on present, recreating next frame", status);
                self.recreate_requested = true;
                Ok(())
            }
            Err(e) => {
                log::error!("Present of image {} failed: {}", self.image_index, e);
                Err(e)
            }
        }
    }

    /// Drop an acquired frame that will not be submitted
    ///
    /// Nothing waits on the slot's image-available semaphore once acquire has
    /// signalled it, and acquiring with a signalled semaphore is invalid, so the
    /// slot gets a fresh one.
    fn abandon_frame(&mut self, device: &mut dyn RenderDevice, frame: usize) {
        let old = self.sync[frame].image_available;
        match device.create_semaphore() {
            Ok(semaphore) => {
                device.destroy_semaphore(old);
                self.sync[frame].image_available = semaphore;
            }
            Err(e) => log::error!("Failed to replace image semaphore of frame {}: {}", frame, e),
        }
        self.state = FrameState::Ready;
    }

    fn replace_fence(&mut self, device: &mut dyn RenderDevice, frame: usize) {
        let old = self.sync[frame].in_flight;
        match device.create_fence(true) {
            Ok(fence) => {
                device.destroy_fence(old);
                self.sync[frame].in_flight = fence;
                for slot in self.images_in_flight.iter_mut().filter(|slot| **slot == Some(old)) {
                    *slot = None;
                }
            }
            Err(e) => log::error!("Failed to replace fence of frame {}: {}", frame, e),
        }
    }

    /// Rebuild the swapchain at the current framebuffer size
    ///
    /// Returns `Ok(false)` without rebuilding when a frame is open or the
    /// framebuffer has zero area. A deferred or failed rebuild leaves the
    /// coordinator in [`FrameState::RecreatingSwapchain`], and every
    /// [`begin_frame`](Self::begin_frame) retries it until it succeeds.
    pub fn recreate_swapchain(&mut self, device: &mut dyn RenderDevice) -> RenderResult<bool> {
        if !matches!(self.state, FrameState::Ready | FrameState::RecreatingSwapchain) {
            log::warn!("Cannot recreate the swapchain in state {:?}", self.state);
            return Ok(false);
        }

        self.state = FrameState::RecreatingSwapchain;
        if self.framebuffer_width == 0 || self.framebuffer_height == 0 {
            log::debug!("Framebuffer has zero area, deferring swapchain recreation");
            return Ok(false);
        }

        let image_count = device
            .wait_idle()
            .and_then(|()| device.recreate_swapchain(self.framebuffer_width, self.framebuffer_height))
            .map_err(|e| {
                log::error!("Swapchain recreation failed: {}", e);
                e
            })?;
        self.state = FrameState::Ready;

        self.images_in_flight = vec![None; image_count as usize];
        self.swapchain_generation = self.framebuffer_generation;
        self.recreate_requested = false;
        self.targets_dirty = true;
        log::info!(
            "Swapchain recreated at {}x{} with {} images",
            self.framebuffer_width,
            self.framebuffer_height,
            image_count
        );
        Ok(true)
    }

    /// Consume the flag raised when render targets must be regenerated
    pub fn take_targets_dirty(&mut self) -> bool {
        std::mem::take(&mut self.targets_dirty)
    }

    /// Current frame slot
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Image acquired by the open frame
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Framebuffer size the swapchain tracks
    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.framebuffer_width, self.framebuffer_height)
    }

    /// Synchronisation objects of a slot
    pub fn sync(&self, frame: usize) -> Option<&FrameSync> {
        self.sync.get(frame)
    }

    /// Wait for the device and destroy every synchronisation object
    pub fn shutdown(&mut self, device: &mut dyn RenderDevice) {
        if let Err(e) = device.wait_idle() {
            log::warn!("wait_idle failed during frame coordinator shutdown: {}", e);
        }
        for frame in self.sync.drain(..) {
            frame.destroy(device);
        }
        self.images_in_flight.clear();
        log::debug!("Frame coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{DeviceCall, HeadlessDevice};

    fn run_frame(coordinator: &mut FrameCoordinator, device: &mut HeadlessDevice) -> Option<FrameInfo> {
        let info = coordinator.begin_frame(device).unwrap()?;
        coordinator.end_frame(device).unwrap();
        Some(info)
    }

    fn window_pass(device: &mut HeadlessDevice) -> (RenderPassHandle, RenderTargetHandle) {
        let pass = device
            .create_renderpass(&RenderPassDesc {
                name: "test".to_string(),
                clear_color: [0.0; 4],
                clear_flags: ClearFlags::COLOR,
                depth_attachment: false,
                has_prev_pass: false,
                has_next_pass: false,
                present_after: true,
            })
            .unwrap();
        let attachment = device.window_attachment(0).unwrap();
        let target = device.create_render_target(pass, &[attachment], 64, 64).unwrap();
        (pass, target)
    }

    #[test]
    fn test_zero_frames_rejected() {
        let mut device = HeadlessDevice::new(64, 64);
        assert!(matches!(FrameCoordinator::new(&mut device, 0), Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_current_frame_cycles() {
        for frames in 1..=3 {
            let mut device = HeadlessDevice::new(64, 64);
            let mut coordinator = FrameCoordinator::new(&mut device, frames).unwrap();
            for p in 1..=7 {
                assert!(run_frame(&mut coordinator, &mut device).is_some());
                assert_eq!(coordinator.current_frame(), p % frames);
            }
        }
    }

    #[test]
    fn test_submit_uses_frame_sync() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        let sync = *coordinator.sync(0).unwrap();
        run_frame(&mut coordinator, &mut device).unwrap();

        let submit = device
            .calls()
            .iter()
            .find_map(|call| match call {
                DeviceCall::Submit(info) => Some(*info),
                _ => None,
            })
            .unwrap();
        assert_eq!(submit.wait_semaphore, sync.image_available);
        assert_eq!(submit.signal_semaphore, sync.render_complete);
        assert_eq!(submit.fence, sync.in_flight);
        assert_eq!(submit.wait_stage, WaitStage::ColorAttachmentOutput);
        assert_eq!(coordinator.state(), FrameState::Ready);
    }

    #[test]
    fn test_out_of_date_acquire_skips_and_recreates() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        device.faults.acquire_status = Some(SwapchainStatus::OutOfDate);

        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 1);
        assert!(coordinator.take_targets_dirty());
        assert!(!coordinator.take_targets_dirty());
        assert_eq!(coordinator.current_frame(), 0);

        assert!(run_frame(&mut coordinator, &mut device).is_some());
    }

    #[test]
    fn test_out_of_date_present_recreates_next_frame() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        device.faults.present_status = Some(SwapchainStatus::OutOfDate);

        assert!(run_frame(&mut coordinator, &mut device).is_some());
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 0);
        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 1);
    }

    #[test]
    fn test_resize_and_zero_size() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();

        coordinator.resize(0, 0);
        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert_eq!(coordinator.state(), FrameState::RecreatingSwapchain);
        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 0);

        coordinator.resize(128, 96);
        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert!(device.calls().contains(&DeviceCall::RecreateSwapchain { width: 128, height: 96 }));
        assert_eq!(device.framebuffer_size(), (128, 96));
        assert!(run_frame(&mut coordinator, &mut device).is_some());
    }

    #[test]
    fn test_fence_timeout_fails_frame() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap().with_fence_timeout(1_000);
        device.faults.fence_timeout = true;

        assert!(coordinator.begin_frame(&mut device).is_err());
        assert_eq!(coordinator.state(), FrameState::Ready);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::BeginCommands(_))), 0);
    }

    #[test]
    fn test_submit_failure_propagates() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        device.faults.submit_failure = true;

        coordinator.begin_frame(&mut device).unwrap().unwrap();
        assert!(coordinator.end_frame(&mut device).is_err());
        assert_eq!(coordinator.current_frame(), 0);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::Present(_))), 0);

        // The slot remains usable once the fault clears
        assert!(run_frame(&mut coordinator, &mut device).is_some());
        assert_eq!(coordinator.current_frame(), 1);
    }

    #[test]
    fn test_waits_on_image_fence_from_older_frame() {
        let mut device = HeadlessDevice::new(64, 64).with_image_count(1);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        let first = coordinator.sync(0).unwrap().in_flight;

        run_frame(&mut coordinator, &mut device).unwrap();
        device.clear_calls();
        run_frame(&mut coordinator, &mut device).unwrap();

        // Frame 1 waits on its own fence in begin_frame, then on frame 0's for the shared image.
        let waits: Vec<_> = device
            .calls()
            .iter()
            .filter_map(|call| match call {
                DeviceCall::WaitForFence(fence) => Some(*fence),
                _ => None,
            })
            .collect();
        assert_eq!(waits.len(), 2);
        assert_eq!(waits[1], first);
    }

    #[test]
    fn test_pass_state_transitions() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        let (pass, target) = window_pass(&mut device);

        let area = RenderArea::sized(64, 64);
        assert!(coordinator.begin_renderpass(&mut device, pass, target, area).is_err());
        coordinator.begin_frame(&mut device).unwrap().unwrap();
        coordinator.begin_renderpass(&mut device, pass, target, area).unwrap();
        assert_eq!(coordinator.state(), FrameState::InPass);
        assert!(matches!(coordinator.end_frame(&mut device), Err(RenderError::InvalidState(_))));
        coordinator.end_renderpass(&mut device, pass).unwrap();
        coordinator.end_frame(&mut device).unwrap();
    }

    #[test]
    fn test_failed_end_commands_leaves_next_frame_usable() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        let (pass, target) = window_pass(&mut device);
        let semaphore = coordinator.sync(0).unwrap().image_available;

        coordinator.begin_frame(&mut device).unwrap().unwrap();
        // Opened behind the coordinator's back, so the device refuses to end recording
        device.begin_renderpass(pass, target, RenderArea::sized(64, 64)).unwrap();
        assert!(matches!(coordinator.end_frame(&mut device), Err(RenderError::InvalidState(_))));
        assert_eq!(coordinator.state(), FrameState::Ready);
        assert_ne!(coordinator.sync(0).unwrap().image_available, semaphore);

        assert!(run_frame(&mut coordinator, &mut device).is_some());
        assert_eq!(coordinator.current_frame(), 1);
    }

    #[test]
    fn test_image_fence_failure_replaces_image_semaphore() {
        let mut device = HeadlessDevice::new(64, 64).with_image_count(1);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        run_frame(&mut coordinator, &mut device).unwrap();

        coordinator.begin_frame(&mut device).unwrap().unwrap();
        let semaphore = coordinator.sync(1).unwrap().image_available;
        assert!(device.is_semaphore_signalled(semaphore));
        device.faults.fence_timeout = true;
        assert!(coordinator.end_frame(&mut device).is_err());
        device.faults.fence_timeout = false;

        let replacement = coordinator.sync(1).unwrap().image_available;
        assert_ne!(replacement, semaphore);
        assert!(!device.is_semaphore_signalled(replacement));
        assert_eq!(device.live_semaphore_count(), 4);
        assert_eq!(coordinator.current_frame(), 1);
        assert!(run_frame(&mut coordinator, &mut device).is_some());
    }

    #[test]
    fn test_fence_reset_failure_recovers() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 1).unwrap();

        coordinator.begin_frame(&mut device).unwrap().unwrap();
        device.faults.fence_reset_failure = true;
        assert!(coordinator.end_frame(&mut device).is_err());
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::Submit(_))), 0);

        // Same slot again: acquire must not see the abandoned signal
        assert!(run_frame(&mut coordinator, &mut device).is_some());
        assert_eq!(device.live_semaphore_count(), 2);
    }

    #[test]
    fn test_failed_recreation_is_retried() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        coordinator.resize(100, 80);
        device.faults.wait_idle_failure = true;

        assert!(coordinator.begin_frame(&mut device).is_err());
        assert_eq!(coordinator.state(), FrameState::RecreatingSwapchain);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 0);

        assert!(coordinator.begin_frame(&mut device).unwrap().is_none());
        assert_eq!(coordinator.state(), FrameState::Ready);
        assert!(device.calls().contains(&DeviceCall::RecreateSwapchain { width: 100, height: 80 }));
        assert!(run_frame(&mut coordinator, &mut device).is_some());
    }

    #[test]
    fn test_recreate_rejected_while_frame_open() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        coordinator.begin_frame(&mut device).unwrap().unwrap();

        assert!(!coordinator.recreate_swapchain(&mut device).unwrap());
        assert_eq!(coordinator.state(), FrameState::Recording);
        assert_eq!(device.count_calls(|c| matches!(c, DeviceCall::RecreateSwapchain { .. })), 0);
        coordinator.end_frame(&mut device).unwrap();
    }

    #[test]
    fn test_shutdown_waits_idle() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut coordinator = FrameCoordinator::new(&mut device, 2).unwrap();
        coordinator.shutdown(&mut device);
        assert!(device.calls().contains(&DeviceCall::WaitIdle));
        assert!(coordinator.sync(0).is_none());
    }
}
