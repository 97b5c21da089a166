// SPDX-License-Identifier: CEPL-1.0
//! Acquire, upload, submit and present, with swapchain recreation folded in.
//!
//! [`FrameLoop`] owns the sequencing and the teardown order; the Vulkan calls
//! themselves sit behind [`FrameBackend`] so the loop runs against a scripted
//! backend in tests.

use screll_render::{FrameStatus, FrameUniforms, RenderSize, SurfaceEvent, UniformSource};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// The parts of one swapchain generation, in creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenerationResource {
    Swapchain,
    ImageViews,
    Pipeline,
    Framebuffers,
    CommandBuffers,
}

impl GenerationResource {
    pub const BUILD_ORDER: [Self; 5] = [
        Self::Swapchain,
        Self::ImageViews,
        Self::Pipeline,
        Self::Framebuffers,
        Self::CommandBuffers,
    ];

    pub const TEARDOWN_ORDER: [Self; 5] = [
        Self::CommandBuffers,
        Self::Framebuffers,
        Self::Pipeline,
        Self::ImageViews,
        Self::Swapchain,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Submitted,
    DeviceIdle,
    Created(GenerationResource),
    Destroyed(GenerationResource),
}

/// Tracks GPU idleness against generation teardown.
///
/// A destruction reported while work is still in flight (a submission with no
/// device-idle wait since) counts as a violation. Event recording is opt-in.
#[derive(Debug, Default)]
pub struct LifecycleProbe {
    gpu_busy: bool,
    violations: usize,
    generations: usize,
    log: Option<Vec<LifecycleEvent>>,
}

impl LifecycleProbe {
    pub fn recording() -> Self {
        Self {
            log: Some(Vec::new()),
            ..Self::default()
        }
    }

    fn push(&mut self, event: LifecycleEvent) {
        if let Some(log) = &mut self.log {
            log.push(event);
        }
    }

    pub fn submitted(&mut self) {
        self.gpu_busy = true;
        self.push(LifecycleEvent::Submitted);
    }

    pub fn idle(&mut self) {
        self.gpu_busy = false;
        self.push(LifecycleEvent::DeviceIdle);
    }

    pub fn created(&mut self, resource: GenerationResource) {
        if resource == GenerationResource::CommandBuffers {
            self.generations += 1;
        }
        self.push(LifecycleEvent::Created(resource));
    }

    pub fn destroyed(&mut self, resource: GenerationResource) {
        if self.gpu_busy {
            self.violations += 1;
            warn!("{resource:?} destroyed while the device may still use it");
        }
        self.push(LifecycleEvent::Destroyed(resource));
    }

    pub fn violations(&self) -> usize {
        self.violations
    }

    /// Completed generation builds, the initial one included.
    pub fn generations(&self) -> usize {
        self.generations
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        self.log.as_deref().unwrap_or(&[])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    /// Out of date or suboptimal; the generation must be rebuilt.
    Stale,
}

/// Device-side operations the frame loop sequences.
///
/// `slot` indexes the per-frame sync objects, `image` the swapchain image.
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;
    fn has_generation(&self) -> bool;
    fn extent(&self) -> RenderSize;

    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquire>;
    /// Waits for an earlier frame still rendering to `image`, then hands it to `slot`.
    fn claim_image(&mut self, slot: usize, image: u32) -> Result<()>;
    fn upload_uniforms(&mut self, image: u32, uniforms: &FrameUniforms) -> Result<()>;
    /// Resets the slot fence and submits the image's command buffer.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;
    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;

    fn wait_idle(&mut self) -> Result<()>;
    /// Releases one part of the current generation; a no-op when absent.
    fn destroy_resource(&mut self, resource: GenerationResource);
    fn build_generation(&mut self, window: RenderSize) -> Result<()>;
    /// Re-records command buffers with a new clear colour. Device must be idle.
    fn set_clear_color(&mut self, clear: [f32; 4]) -> Result<()>;
}

pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    probe: LifecycleProbe,
    state: FrameState,
    slot: usize,
    window: RenderSize,
    stale: bool,
}

impl<B: FrameBackend> FrameLoop<B> {
    /// Builds the first generation unless the window starts out empty.
    pub fn new(backend: B, window: RenderSize, probe: LifecycleProbe) -> Result<Self> {
        let mut frames = Self {
            backend,
            probe,
            state: FrameState::Idle,
            slot: 0,
            window,
            stale: true,
        };
        if !window.is_empty() {
            frames.backend.build_generation(window)?;
            frames.record_built();
        }
        Ok(frames)
    }

    pub fn handle_event(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Resized(size) => {
                debug!("surface resized to {}x{}", size.width, size.height);
                self.window = size;
                self.stale = true;
            }
        }
    }

    pub fn draw_frame(&mut self, uniforms: &mut dyn UniformSource) -> Result<FrameStatus> {
        let result = self.run_frame(uniforms);
        self.state = FrameState::Idle;
        result
    }

    fn run_frame(&mut self, uniforms: &mut dyn UniformSource) -> Result<FrameStatus> {
        if self.window.is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        if self.stale || !self.backend.has_generation() {
            self.recreate_swapchain()?;
        }

        let slot = self.slot;
        self.state = FrameState::Acquiring;
        self.backend.wait_for_slot(slot)?;
        let image = match self.backend.acquire_image(slot)? {
            Acquire::OutOfDate => {
                debug!("acquire out of date");
                self.recreate_swapchain()?;
                return Ok(FrameStatus::Recreated);
            }
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("acquired suboptimal image {index}");
                }
                index
            }
        };

        self.state = FrameState::Recording;
        self.backend.claim_image(slot, image)?;
        let frame = uniforms.frame_uniforms(self.backend.extent());
        self.backend.upload_uniforms(image, &frame)?;

        self.state = FrameState::Submitted;
        self.backend.submit(slot, image)?;
        self.probe.submitted();

        self.state = FrameState::Presenting;
        let presented = self.backend.present(slot, image)?;
        self.slot = (slot + 1) % self.backend.frames_in_flight().max(1);

        if presented == Present::Stale {
            debug!("present reported a stale swapchain");
            self.recreate_swapchain()?;
        }
        Ok(FrameStatus::Presented)
    }

    /// Idle, tear the generation down, rebuild it for the current window size.
    /// An empty window leaves the rebuild pending.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.stale = true;
        if self.window.is_empty() {
            debug!("recreation deferred until the window has a non-zero size");
            return Ok(());
        }
        self.wait_idle()?;
        self.teardown();
        self.backend.build_generation(self.window)?;
        self.record_built();
        Ok(())
    }

    /// Runs `f` with the device idle.
    pub fn with_device_idle<T>(&mut self, f: impl FnOnce(&mut B) -> Result<T>) -> Result<T> {
        self.wait_idle()?;
        f(&mut self.backend)
    }

    pub fn set_clear_color(&mut self, clear: [f32; 4]) -> Result<()> {
        self.with_device_idle(|backend| backend.set_clear_color(clear))
    }

    /// Leaves the device idle with no generation alive.
    pub fn shutdown(&mut self) -> Result<()> {
        let idle = self.wait_idle();
        if idle.is_ok() {
            self.teardown();
        }
        self.stale = true;
        idle
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.probe.idle();
        Ok(())
    }

    fn teardown(&mut self) {
        for resource in GenerationResource::TEARDOWN_ORDER {
            self.backend.destroy_resource(resource);
            self.probe.destroyed(resource);
        }
    }

    fn record_built(&mut self) {
        for resource in GenerationResource::BUILD_ORDER {
            self.probe.created(resource);
        }
        self.stale = false;
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn window_size(&self) -> RenderSize {
        self.window
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn probe(&self) -> &LifecycleProbe {
        &self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        WaitSlot(usize),
        Acquire(usize),
        Claim(usize, u32),
        Upload(u32),
        Submit(usize, u32),
        Present(usize, u32),
        Idle,
        Destroy(GenerationResource),
        Build(RenderSize),
        Clear([f32; 4]),
    }

    struct Mock {
        frames: usize,
        images: u32,
        next_image: u32,
        built: Option<RenderSize>,
        calls: Vec<Call>,
        acquire_script: VecDeque<Acquire>,
        present_script: VecDeque<Present>,
        build_failures: VecDeque<RenderError>,
        submit_failure: Option<RenderError>,
    }

    impl Mock {
        fn new(frames: usize) -> Self {
            Self {
                frames,
                images: 3,
                next_image: 0,
                built: None,
                calls: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                build_failures: VecDeque::new(),
                submit_failure: None,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for Mock {
        fn frames_in_flight(&self) -> usize {
            self.frames
        }

        fn has_generation(&self) -> bool {
            self.built.is_some()
        }

        fn extent(&self) -> RenderSize {
            self.built.unwrap_or_default()
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::WaitSlot(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_script.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (index + 1) % self.images;
                Acquire::Image {
                    index,
                    suboptimal: false,
                }
            }))
        }

        fn claim_image(&mut self, slot: usize, image: u32) -> Result<()> {
            self.calls.push(Call::Claim(slot, image));
            Ok(())
        }

        fn upload_uniforms(&mut self, image: u32, _: &FrameUniforms) -> Result<()> {
            self.calls.push(Call::Upload(image));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
            if let Some(err) = self.submit_failure.take() {
                return Err(err);
            }
            self.calls.push(Call::Submit(slot, image));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
            self.calls.push(Call::Present(slot, image));
            Ok(self.present_script.pop_front().unwrap_or(Present::Done))
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::Idle);
            Ok(())
        }

        fn destroy_resource(&mut self, resource: GenerationResource) {
            self.calls.push(Call::Destroy(resource));
            if resource == GenerationResource::Swapchain {
                self.built = None;
            }
        }

        fn build_generation(&mut self, window: RenderSize) -> Result<()> {
            self.calls.push(Call::Build(window));
            if let Some(err) = self.build_failures.pop_front() {
                return Err(err);
            }
            self.built = Some(window);
            Ok(())
        }

        fn set_clear_color(&mut self, clear: [f32; 4]) -> Result<()> {
            self.calls.push(Call::Clear(clear));
            Ok(())
        }
    }

    fn identity(_: RenderSize) -> FrameUniforms {
        FrameUniforms::identity()
    }

    fn size(w: u32, h: u32) -> RenderSize {
        RenderSize::new(w, h)
    }

    fn frames(mock: Mock, window: RenderSize) -> FrameLoop<Mock> {
        FrameLoop::new(mock, window, LifecycleProbe::recording()).unwrap()
    }

    #[test]
    fn initial_build_creates_generation_in_order() {
        let f = frames(Mock::new(2), size(800, 600));
        assert_eq!(f.backend().calls, vec![Call::Build(size(800, 600))]);
        let created: Vec<_> = f
            .probe()
            .events()
            .iter()
            .filter_map(|e| match e {
                LifecycleEvent::Created(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(created, GenerationResource::BUILD_ORDER);
        assert_eq!(f.probe().generations(), 1);
        assert_eq!(f.state(), FrameState::Idle);
    }

    #[test]
    fn plain_frame_runs_acquire_upload_submit_present() {
        let mut f = frames(Mock::new(2), size(800, 600));
        f.backend_mut().calls.clear();
        let status = f.draw_frame(&mut identity).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            f.backend().calls,
            vec![
                Call::WaitSlot(0),
                Call::Acquire(0),
                Call::Claim(0, 0),
                Call::Upload(0),
                Call::Submit(0, 0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(f.state(), FrameState::Idle);
    }

    #[test]
    fn slots_rotate_through_frames_in_flight() {
        let mut f = frames(Mock::new(2), size(64, 64));
        for _ in 0..3 {
            f.draw_frame(&mut identity).unwrap();
        }
        let waits: Vec<_> = f
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::WaitSlot(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(waits, vec![0, 1, 0]);

        let mut single = frames(Mock::new(1), size(64, 64));
        for _ in 0..3 {
            single.draw_frame(&mut identity).unwrap();
        }
        assert_eq!(single.backend().count(|c| *c == Call::WaitSlot(0)), 3);
    }

    #[test]
    fn resize_rebuilds_after_idle_in_teardown_order() {
        let mut f = frames(Mock::new(2), size(800, 600));
        f.draw_frame(&mut identity).unwrap();
        f.handle_event(SurfaceEvent::Resized(size(1024, 768)));
        f.backend_mut().calls.clear();

        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        let calls = &f.backend().calls;
        let mut expected = vec![Call::Idle];
        expected.extend(GenerationResource::TEARDOWN_ORDER.map(Call::Destroy));
        expected.push(Call::Build(size(1024, 768)));
        assert_eq!(&calls[..7], expected.as_slice());
        assert!(calls.contains(&Call::Present(1, 1)));
        assert_eq!(f.backend().extent(), size(1024, 768));
        assert_eq!(f.probe().violations(), 0);
        assert_eq!(f.probe().generations(), 2);
    }

    #[test]
    fn out_of_date_acquire_recreates_without_submitting() {
        let mut mock = Mock::new(2);
        mock.acquire_script.push_back(Acquire::OutOfDate);
        let mut f = frames(mock, size(640, 480));

        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Recreated);
        let m = f.backend();
        assert_eq!(m.count(|c| matches!(c, Call::Submit(..))), 0);
        assert_eq!(m.count(|c| matches!(c, Call::Upload(_))), 0);
        assert_eq!(m.count(|c| matches!(c, Call::Build(_))), 2);
        assert_eq!(f.probe().violations(), 0);

        // The next frame uses the same slot: its fence was never reset.
        f.backend_mut().calls.clear();
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert_eq!(f.backend().calls[0], Call::WaitSlot(0));
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let mut mock = Mock::new(2);
        mock.acquire_script.push_back(Acquire::Image {
            index: 2,
            suboptimal: true,
        });
        let mut f = frames(mock, size(640, 480));
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert!(f.backend().calls.contains(&Call::Present(0, 2)));
        assert_eq!(f.backend().count(|c| matches!(c, Call::Build(_))), 1);
    }

    #[test]
    fn stale_present_recreates_after_submission_without_violation() {
        let mut mock = Mock::new(2);
        mock.present_script.push_back(Present::Stale);
        let mut f = frames(mock, size(640, 480));
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert_eq!(f.probe().generations(), 2);

        let events = f.probe().events();
        let submitted = events.iter().position(|e| *e == LifecycleEvent::Submitted).unwrap();
        let idle = events.iter().rposition(|e| *e == LifecycleEvent::DeviceIdle).unwrap();
        let first_destroy = events
            .iter()
            .position(|e| matches!(e, LifecycleEvent::Destroyed(_)))
            .unwrap();
        assert!(submitted < idle && idle < first_destroy);
        assert_eq!(f.probe().violations(), 0);
    }

    #[test]
    fn unchanged_size_recreation_keeps_the_extent() {
        let mut f = frames(Mock::new(2), size(1280, 720));
        f.handle_event(SurfaceEvent::Resized(size(1280, 720)));
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        let builds: Vec<_> = f
            .backend()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Build(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(builds, vec![size(1280, 720), size(1280, 720)]);
    }

    #[test]
    fn zero_size_pauses_until_a_real_size_arrives() {
        let mut f = frames(Mock::new(2), size(800, 600));
        f.handle_event(SurfaceEvent::Resized(size(0, 0)));
        f.backend_mut().calls.clear();

        for _ in 0..3 {
            assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Skipped);
        }
        assert!(f.backend().calls.is_empty());

        f.handle_event(SurfaceEvent::Resized(size(300, 200)));
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert!(f.backend().calls.contains(&Call::Build(size(300, 200))));
        assert_eq!(f.probe().violations(), 0);
    }

    #[test]
    fn minimized_at_start_builds_on_first_real_size() {
        let mut f = frames(Mock::new(2), size(0, 0));
        assert!(f.backend().calls.is_empty());
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Skipped);
        f.handle_event(SurfaceEvent::Resized(size(10, 10)));
        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert_eq!(f.probe().generations(), 1);
    }

    #[test]
    fn failed_rebuild_is_retried_on_the_next_frame() {
        let mut f = frames(Mock::new(2), size(800, 600));
        f.backend_mut()
            .build_failures
            .push_back(RenderError::SwapchainUnsupported("no surface formats"));
        f.handle_event(SurfaceEvent::Resized(size(900, 600)));

        let err = f.draw_frame(&mut identity).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!f.backend().has_generation());
        assert_eq!(f.state(), FrameState::Idle);

        assert_eq!(f.draw_frame(&mut identity).unwrap(), FrameStatus::Presented);
        assert_eq!(f.backend().extent(), size(900, 600));
        assert_eq!(f.probe().violations(), 0);
    }

    #[test]
    fn submission_failure_is_fatal_and_resets_state() {
        let mut mock = Mock::new(2);
        mock.submit_failure = Some(RenderError::FrameSubmission {
            stage: "queue_submit",
            source: vk::Result::ERROR_DEVICE_LOST,
        });
        let mut f = frames(mock, size(800, 600));
        let err = f.draw_frame(&mut identity).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(matches!(err, RenderError::FrameSubmission { stage: "queue_submit", .. }));
        assert_eq!(f.state(), FrameState::Idle);
        assert_eq!(f.backend().count(|c| matches!(c, Call::Present(..))), 0);
    }

    #[test]
    fn uniforms_see_the_generation_extent() {
        let mut f = frames(Mock::new(2), size(320, 240));
        let mut seen = Vec::new();
        let mut source = |extent: RenderSize| {
            seen.push(extent);
            FrameUniforms::identity()
        };
        f.draw_frame(&mut source).unwrap();
        assert_eq!(seen, vec![size(320, 240)]);
    }

    #[test]
    fn clear_color_change_waits_for_idle() {
        let mut f = frames(Mock::new(2), size(64, 64));
        f.draw_frame(&mut identity).unwrap();
        f.backend_mut().calls.clear();
        f.set_clear_color([1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(
            f.backend().calls,
            vec![Call::Idle, Call::Clear([1.0, 0.0, 0.0, 1.0])]
        );
    }

    #[test]
    fn shutdown_idles_then_tears_down() {
        let mut f = frames(Mock::new(2), size(64, 64));
        f.draw_frame(&mut identity).unwrap();
        f.backend_mut().calls.clear();
        f.shutdown().unwrap();
        let mut expected = vec![Call::Idle];
        expected.extend(GenerationResource::TEARDOWN_ORDER.map(Call::Destroy));
        assert_eq!(f.backend().calls, expected);
        assert!(!f.backend().has_generation());
        assert_eq!(f.probe().violations(), 0);
    }

    #[test]
    fn probe_flags_destruction_while_busy() {
        let mut probe = LifecycleProbe::default();
        probe.submitted();
        probe.destroyed(GenerationResource::Framebuffers);
        assert_eq!(probe.violations(), 1);
        probe.idle();
        probe.destroyed(GenerationResource::Pipeline);
        assert_eq!(probe.violations(), 1);
        assert!(probe.events().is_empty());
    }

    #[test]
    fn teardown_and_build_orders_mirror_each_other() {
        let mut reversed = GenerationResource::BUILD_ORDER;
        reversed.reverse();
        assert_eq!(reversed, GenerationResource::TEARDOWN_ORDER);
    }
}
