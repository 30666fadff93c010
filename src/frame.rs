// Frame scheduling
//
// Drives one frame per call: wait for the slot's fence, acquire an image,
// submit its pre-recorded commands, present. Frames cycle through a fixed
// number of slots, so the CPU is never more than that many frames ahead.
//
// The scheduler only sequences calls. Everything that touches Vulkan sits
// behind FrameBackend / SwapchainLifecycle, implemented by RenderSession.

use crate::backend::error::Result;
use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};

/// Per-frame GPU operations for one slot.
pub trait FrameBackend {
    /// Block until the work last submitted on `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Return the slot's fence to unsignaled before it is re-armed. Called
    /// only once an image is acquired, so an abandoned frame leaves it signaled.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Request the next presentable image, signaling the slot's
    /// image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Submit the command buffer bound to `image_index`, arming the slot's
    /// fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
}

/// Steps of a wholesale swapchain rebuild.
pub trait SwapchainLifecycle {
    /// Drain all GPU work; the only point where swapchain-dependent objects
    /// may be destroyed.
    fn wait_idle(&mut self) -> Result<()>;

    /// Destroy framebuffers, pipeline, render pass, image views, swapchain,
    /// in that order.
    fn release_swapchain(&mut self) -> Result<()>;

    fn create_swapchain(&mut self) -> Result<()>;
    fn create_image_views(&mut self) -> Result<()>;
    fn create_render_pass(&mut self) -> Result<()>;
    fn create_pipeline(&mut self) -> Result<()>;
    fn create_framebuffers(&mut self) -> Result<()>;
    fn record_command_buffers(&mut self) -> Result<()>;
}

/// Tear down and rebuild everything that depends on the swapchain.
/// Device, queues and surface are untouched.
pub fn rebuild_swapchain<L: SwapchainLifecycle + ?Sized>(lifecycle: &mut L) -> Result<()> {
    lifecycle.wait_idle()?;
    lifecycle.release_swapchain()?;
    lifecycle.create_swapchain()?;
    lifecycle.create_image_views()?;
    lifecycle.create_render_pass()?;
    lifecycle.create_pipeline()?;
    lifecycle.create_framebuffers()?;
    lifecycle.record_command_buffers()
}

/// Phase of the frame currently being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
}

/// What happened to one `draw_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented.
    Presented,
    /// Submitted and presented, then the swapchain was rebuilt because
    /// presentation reported it out of date.
    PresentedThenRebuilt,
    /// Acquire reported out of date; nothing was submitted and the swapchain
    /// was rebuilt.
    Rebuilt,
}

pub struct FrameScheduler {
    frames_in_flight: usize,
    frame_counter: u64,
    phase: FramePhase,
    stale: bool,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame slot is required");
        Self {
            frames_in_flight,
            frame_counter: 0,
            phase: FramePhase::Idle,
            stale: false,
        }
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.frames_in_flight as u64) as usize
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Ask for a rebuild before the next acquire (e.g. the window was resized).
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Run the rebuild now if one is pending. Returns whether it ran.
    pub fn rebuild_if_stale<B: SwapchainLifecycle + ?Sized>(&mut self, backend: &mut B) -> Result<bool> {
        if !self.stale {
            return Ok(false);
        }
        rebuild_swapchain(backend)?;
        self.stale = false;
        Ok(true)
    }

    /// Drive one frame through Idle → Acquiring → Submitting → Presenting → Idle.
    ///
    /// On error the counter does not advance and `phase()` reports where the
    /// frame stopped; the caller decides whether the error is fatal.
    pub fn draw_frame<B>(&mut self, backend: &mut B) -> Result<FrameStatus>
    where
        B: FrameBackend + SwapchainLifecycle + ?Sized,
    {
        self.phase = FramePhase::Idle;
        let status = self.drive(backend)?;
        self.phase = FramePhase::Idle;
        Ok(status)
    }

    fn drive<B>(&mut self, backend: &mut B) -> Result<FrameStatus>
    where
        B: FrameBackend + SwapchainLifecycle + ?Sized,
    {
        self.rebuild_if_stale(backend)?;

        let slot = self.current_slot();

        // Backpressure: this slot's previous submission must be done.
        backend.wait_for_slot(slot)?;

        self.phase = FramePhase::Acquiring;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date at acquire, rebuilding");
                rebuild_swapchain(backend)?;
                return Ok(FrameStatus::Rebuilt);
            }
        };

        // Reset only once an image is in hand: an abandoned frame must leave
        // the fence signaled or the next wait on this slot never returns.
        self.phase = FramePhase::Submitting;
        backend.reset_slot(slot)?;
        backend.submit(slot, image_index)?;

        self.phase = FramePhase::Presenting;
        let outcome = backend.present(slot, image_index)?;
        self.frame_counter += 1;

        match outcome {
            PresentOutcome::Presented => Ok(FrameStatus::Presented),
            PresentOutcome::OutOfDate => {
                log::debug!("Swapchain out of date at present, rebuilding");
                rebuild_swapchain(backend)?;
                Ok(FrameStatus::PresentedThenRebuilt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::RenderError;
    use ash::vk;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Wait { slot: usize, blocked: bool },
        Reset(usize),
        Acquire(usize),
        Submit { slot: usize, image: u32 },
        Present { slot: usize, image: u32 },
        Step(&'static str),
    }

    /// Scripted GPU: a submitted slot stays busy until it is waited on, and
    /// acquire/present results can be queued up front.
    #[derive(Default)]
    struct ScriptedGpu {
        events: Vec<Event>,
        busy: Vec<bool>,
        next_image: u32,
        image_count: u32,
        acquire_script: VecDeque<std::result::Result<AcquireOutcome, vk::Result>>,
        present_script: VecDeque<std::result::Result<PresentOutcome, vk::Result>>,
        // Window has no drawable area; swapchain creation is refused.
        minimised: bool,
    }

    impl ScriptedGpu {
        fn new(slots: usize, image_count: u32) -> Self {
            Self {
                busy: vec![false; slots],
                image_count,
                ..Default::default()
            }
        }

        fn blocks(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, Event::Wait { blocked: true, .. }))
                .count()
        }

        fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|e| pred(e)).count()
        }

        fn steps(&self) -> Vec<&'static str> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Step(name) => Some(*name),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for ScriptedGpu {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            let blocked = self.busy[slot];
            self.busy[slot] = false;
            self.events.push(Event::Wait { slot, blocked });
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.events.push(Event::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.events.push(Event::Acquire(slot));
            match self.acquire_script.pop_front() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(code)) => Err(RenderError::from_frame("acquire", code)),
                None => {
                    let image = self.next_image;
                    self.next_image = (self.next_image + 1) % self.image_count;
                    Ok(AcquireOutcome::Acquired(image))
                }
            }
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
            self.busy[slot] = true;
            self.events.push(Event::Submit { slot, image });
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome> {
            self.events.push(Event::Present { slot, image });
            match self.present_script.pop_front() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(code)) => Err(RenderError::from_frame("present", code)),
                None => Ok(PresentOutcome::Presented),
            }
        }
    }

    impl SwapchainLifecycle for ScriptedGpu {
        fn wait_idle(&mut self) -> Result<()> {
            self.busy.iter_mut().for_each(|b| *b = false);
            self.events.push(Event::Step("wait_idle"));
            Ok(())
        }
        fn release_swapchain(&mut self) -> Result<()> {
            self.events.push(Event::Step("release"));
            Ok(())
        }
        fn create_swapchain(&mut self) -> Result<()> {
            if self.minimised {
                return Err(RenderError::SurfaceOutOfDate);
            }
            self.next_image = 0;
            self.events.push(Event::Step("swapchain"));
            Ok(())
        }
        fn create_image_views(&mut self) -> Result<()> {
            self.events.push(Event::Step("image_views"));
            Ok(())
        }
        fn create_render_pass(&mut self) -> Result<()> {
            self.events.push(Event::Step("render_pass"));
            Ok(())
        }
        fn create_pipeline(&mut self) -> Result<()> {
            self.events.push(Event::Step("pipeline"));
            Ok(())
        }
        fn create_framebuffers(&mut self) -> Result<()> {
            self.events.push(Event::Step("framebuffers"));
            Ok(())
        }
        fn record_command_buffers(&mut self) -> Result<()> {
            self.events.push(Event::Step("command_buffers"));
            Ok(())
        }
    }

    const FULL_REBUILD: [&str; 8] = [
        "wait_idle",
        "release",
        "swapchain",
        "image_views",
        "render_pass",
        "pipeline",
        "framebuffers",
        "command_buffers",
    ];

    #[test]
    fn slots_cycle_modulo_frames_in_flight() {
        let mut gpu = ScriptedGpu::new(2, 3);
        let mut scheduler = FrameScheduler::new(2);

        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(scheduler.current_slot());
            assert_eq!(scheduler.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(scheduler.frame_counter(), 5);
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn third_submission_blocks_exactly_once() {
        let mut gpu = ScriptedGpu::new(2, 3);
        let mut scheduler = FrameScheduler::new(2);

        for _ in 0..3 {
            scheduler.draw_frame(&mut gpu).unwrap();
        }

        assert_eq!(gpu.blocks(), 1);
        let block_at = gpu
            .events
            .iter()
            .position(|e| matches!(e, Event::Wait { blocked: true, .. }))
            .unwrap();
        let third_submit = gpu
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Submit { .. }))
            .nth(2)
            .map(|(i, _)| i)
            .unwrap();
        assert!(block_at < third_submit);
        assert_eq!(gpu.events[block_at], Event::Wait { slot: 0, blocked: true });
    }

    #[test]
    fn frame_runs_in_state_machine_order() {
        let mut gpu = ScriptedGpu::new(2, 3);
        let mut scheduler = FrameScheduler::new(2);
        scheduler.draw_frame(&mut gpu).unwrap();

        assert_eq!(
            gpu.events,
            vec![
                Event::Wait { slot: 0, blocked: false },
                Event::Acquire(0),
                Event::Reset(0),
                Event::Submit { slot: 0, image: 0 },
                Event::Present { slot: 0, image: 0 },
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_submitting() {
        let mut gpu = ScriptedGpu::new(2, 3);
        gpu.acquire_script.push_back(Ok(AcquireOutcome::OutOfDate));
        let mut scheduler = FrameScheduler::new(2);

        assert_eq!(scheduler.draw_frame(&mut gpu).unwrap(), FrameStatus::Rebuilt);
        assert_eq!(gpu.count(|e| matches!(e, Event::Submit { .. })), 0);
        assert_eq!(gpu.count(|e| matches!(e, Event::Present { .. })), 0);
        assert_eq!(gpu.count(|e| matches!(e, Event::Reset(_))), 0);
        assert_eq!(gpu.steps(), FULL_REBUILD.to_vec());
        assert_eq!(scheduler.frame_counter(), 0);

        // The rebuild is complete before the next acquire starts.
        scheduler.draw_frame(&mut gpu).unwrap();
        let last_step = gpu.events.iter().rposition(|e| matches!(e, Event::Step(_))).unwrap();
        let second_acquire = gpu
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Acquire(_)))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(last_step < second_acquire);
        assert_eq!(gpu.steps().len(), FULL_REBUILD.len());
    }

    #[test]
    fn out_of_date_present_rebuilds_after_presenting() {
        let mut gpu = ScriptedGpu::new(2, 3);
        gpu.present_script.push_back(Ok(PresentOutcome::OutOfDate));
        let mut scheduler = FrameScheduler::new(2);

        assert_eq!(scheduler.draw_frame(&mut gpu).unwrap(), FrameStatus::PresentedThenRebuilt);
        let present_at = gpu.events.iter().position(|e| matches!(e, Event::Present { .. })).unwrap();
        let first_step = gpu.events.iter().position(|e| matches!(e, Event::Step(_))).unwrap();
        assert!(present_at < first_step);
        assert_eq!(gpu.steps(), FULL_REBUILD.to_vec());
        assert_eq!(scheduler.frame_counter(), 1);
    }

    #[test]
    fn present_failure_is_fatal() {
        let mut gpu = ScriptedGpu::new(2, 3);
        gpu.present_script.push_back(Err(vk::Result::ERROR_DEVICE_LOST));
        let mut scheduler = FrameScheduler::new(2);

        let err = scheduler.draw_frame(&mut gpu).unwrap_err();
        assert!(matches!(err, RenderError::Render { code: vk::Result::ERROR_DEVICE_LOST, .. }));
        assert!(gpu.steps().is_empty());
        assert_eq!(scheduler.phase(), FramePhase::Presenting);
        assert_eq!(scheduler.frame_counter(), 0);
    }

    #[test]
    fn lost_surface_at_acquire_propagates() {
        let mut gpu = ScriptedGpu::new(2, 3);
        gpu.acquire_script.push_back(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        let mut scheduler = FrameScheduler::new(2);

        assert!(matches!(scheduler.draw_frame(&mut gpu), Err(RenderError::SurfaceLost)));
        assert_eq!(scheduler.phase(), FramePhase::Acquiring);
        assert!(gpu.steps().is_empty());
        assert_eq!(gpu.count(|e| matches!(e, Event::Submit { .. })), 0);
    }

    #[test]
    fn stale_swapchain_is_rebuilt_before_acquiring() {
        let mut gpu = ScriptedGpu::new(2, 3);
        let mut scheduler = FrameScheduler::new(2);
        scheduler.mark_stale();

        assert_eq!(scheduler.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
        assert_eq!(gpu.steps(), FULL_REBUILD.to_vec());
        assert!(!scheduler.rebuild_if_stale(&mut gpu).unwrap());
        let first_acquire = gpu.events.iter().position(|e| matches!(e, Event::Acquire(_))).unwrap();
        let last_step = gpu.events.iter().rposition(|e| matches!(e, Event::Step(_))).unwrap();
        assert!(last_step < first_acquire);
    }

    #[test]
    fn rebuild_runs_only_when_stale() {
        let mut gpu = ScriptedGpu::new(1, 2);
        let mut scheduler = FrameScheduler::new(1);
        assert!(!scheduler.rebuild_if_stale(&mut gpu).unwrap());
        scheduler.mark_stale();
        assert!(scheduler.rebuild_if_stale(&mut gpu).unwrap());
        assert!(!scheduler.rebuild_if_stale(&mut gpu).unwrap());
        assert_eq!(gpu.steps().len(), FULL_REBUILD.len());
    }

    #[test]
    fn minimised_during_present_rebuild_defers_until_restored() {
        let mut gpu = ScriptedGpu::new(2, 3);
        gpu.present_script.push_back(Ok(PresentOutcome::OutOfDate));
        gpu.minimised = true;
        let mut scheduler = FrameScheduler::new(2);

        let err = scheduler.draw_frame(&mut gpu).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(gpu.steps(), vec!["wait_idle", "release"]);
        assert_eq!(scheduler.frame_counter(), 1);

        // What the session does with a recoverable error.
        scheduler.mark_stale();
        gpu.minimised = false;
        gpu.events.clear();

        assert_eq!(scheduler.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
        assert_eq!(gpu.steps(), FULL_REBUILD.to_vec());
        assert_eq!(scheduler.frame_counter(), 2);
    }
}
