// =============================================================================
// RENDERER - owns every Vulkan object and tears them down in order
// =============================================================================
//
// BRING-UP:
// ┌───────────────────────────────────────────────────────────────────┐
// │  Context (instance + messenger)                                   │
// │    └── Surface ── adapter selection ── LogicalDevice              │
// │          └── PresentationChain (images + views)                   │
// │                └── RenderPass ── GraphicsPipeline ── Framebuffers │
// │                      └── CommandPool (pre-recorded) ── Semaphores │
// └───────────────────────────────────────────────────────────────────┘
//
// Teardown walks the same tree bottom-up, after the device is idle.
//
// =============================================================================

use anyhow::{Context as _, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::commands::CommandPool;
use crate::backend::device::required_device_extensions;
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use crate::backend::probe::{select_adapter, VkAdapter};
use crate::backend::shader::read_bytecode;
use crate::backend::surface::Surface;
use crate::backend::swapchain::PresentationChain;
use crate::backend::sync::SyncPrimitives;
use crate::backend::{Context, LogicalDevice};
use crate::config::Config;
use crate::error::{FrameError, InitError};
use crate::frame::{FrameDriver, FrameTarget};

/// Owned resource groups, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Context,
    Surface,
    Device,
    Chain,
    RenderPass,
    Pipeline,
    Framebuffers,
    Commands,
    Sync,
}

impl Stage {
    /// Release order: children before the objects they were created from.
    pub const TEARDOWN: [Stage; 9] = [
        Stage::Sync,
        Stage::Commands,
        Stage::Framebuffers,
        Stage::Pipeline,
        Stage::RenderPass,
        Stage::Chain,
        Stage::Device,
        Stage::Surface,
        Stage::Context,
    ];
}

/// Owner type held for each stage.
pub trait StageTypes {
    type Context;
    type Surface;
    type Device;
    type Chain;
    type RenderPass;
    type Pipeline;
    type Framebuffers;
    type Commands;
    type Sync;
}

pub struct VulkanStages;

impl StageTypes for VulkanStages {
    type Context = Arc<Context>;
    type Surface = Arc<Surface>;
    type Device = Arc<LogicalDevice>;
    type Chain = PresentationChain;
    type RenderPass = RenderPass;
    type Pipeline = GraphicsPipeline;
    type Framebuffers = Framebuffers;
    type Commands = CommandPool;
    type Sync = SyncPrimitives;
}

/// One slot per stage. Slots are emptied in `Stage::TEARDOWN` order, either
/// explicitly through `teardown` or on drop.
pub struct Resources<T: StageTypes> {
    pub sync: Option<T::Sync>,
    pub commands: Option<T::Commands>,
    pub framebuffers: Option<T::Framebuffers>,
    pub pipeline: Option<T::Pipeline>,
    pub render_pass: Option<T::RenderPass>,
    pub chain: Option<T::Chain>,
    pub device: Option<T::Device>,
    pub surface: Option<T::Surface>,
    pub context: Option<T::Context>,
}

impl<T: StageTypes> Resources<T> {
    fn release(&mut self, stage: Stage) {
        match stage {
            Stage::Sync => drop(self.sync.take()),
            Stage::Commands => drop(self.commands.take()),
            Stage::Framebuffers => drop(self.framebuffers.take()),
            Stage::Pipeline => drop(self.pipeline.take()),
            Stage::RenderPass => drop(self.render_pass.take()),
            Stage::Chain => drop(self.chain.take()),
            Stage::Device => drop(self.device.take()),
            Stage::Surface => drop(self.surface.take()),
            Stage::Context => drop(self.context.take()),
        }
    }

    /// Release every stage still held. Calling it again is a no-op.
    pub fn teardown(&mut self) {
        for stage in Stage::TEARDOWN {
            log::debug!("Releasing {:?}", stage);
            self.release(stage);
        }
    }
}

impl<T: StageTypes> Drop for Resources<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Queue-side half of a frame: the chain plus the recorded buffers.
struct ChainTarget<'a> {
    device: &'a LogicalDevice,
    chain: &'a PresentationChain,
    command_buffers: &'a [vk::CommandBuffer],
}

impl FrameTarget for ChainTarget<'_> {
    fn image_count(&self) -> usize {
        self.chain.image_count()
    }

    fn acquire(&mut self, timeout: u64, signal: vk::Semaphore) -> Result<(u32, bool), FrameError> {
        self.chain
            .acquire_next_image(timeout, signal)
            .map_err(FrameError::Acquire)
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
    ) -> Result<(), FrameError> {
        let cmd = *self
            .command_buffers
            .get(image_index as usize)
            .ok_or(FrameError::IndexOutOfRange {
                index: image_index,
                count: self.command_buffers.len(),
            })?;

        let wait_semaphores = [wait];
        let wait_stages = [wait_stage];
        let command_buffers = [cmd];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }
        .map_err(|result| FrameError::Submit { index: image_index, result })
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, FrameError> {
        self.chain
            .present(self.device.present_queue, image_index, &[wait])
            .map_err(|result| FrameError::Present { index: image_index, result })
    }
}

/// Every Vulkan object the application owns.
pub struct Renderer {
    frame_driver: FrameDriver,
    resources: Resources<VulkanStages>,
}

impl Renderer {
    /// Build everything needed to draw into `window`.
    ///
    /// The window must outlive the renderer. On failure, whatever was already
    /// created is released on the way out.
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, validation layer and debug messenger
        // ─────────────────────────────────────────────────────────────────────
        let entry = unsafe { ash::Entry::load() }.map_err(InitError::from)?;

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        let window_extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(InitError::WindowSupport)?;

        let context = Context::new(
            entry,
            &config.window.title,
            window_extensions,
            config.want_diagnostics(),
        )?;
        if context.diagnostics_enabled() {
            log::info!("Validation layer and debug messenger active");
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface for the window
        // ─────────────────────────────────────────────────────────────────────
        let surface = unsafe { Surface::new(&context, display_handle, window_handle) }?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pick an adapter and bind a logical device
        // ─────────────────────────────────────────────────────────────────────
        let physical_devices = context.enumerate_adapters()?;
        let adapters: Vec<VkAdapter> = physical_devices
            .iter()
            .map(|&pd| VkAdapter::new(&context.instance, &surface, pd))
            .collect();

        let (selected, queues) = select_adapter(&adapters, &required_device_extensions())?;
        let physical_device = adapters[selected].physical_device;
        drop(adapters);

        let device = LogicalDevice::new(&context, physical_device, queues)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Presentation chain at the window's size
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        let chain = PresentationChain::new(&device, &surface, size.width, size.height)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Render pass, pipeline and framebuffers
        // ─────────────────────────────────────────────────────────────────────
        let render_pass = RenderPass::new(&device, chain.format.format)?;

        let vertex_code = read_bytecode(&config.shaders.vertex).map_err(InitError::from)?;
        let fragment_code = read_bytecode(&config.shaders.fragment).map_err(InitError::from)?;

        let pipeline = GraphicsPipeline::new(
            &device,
            &render_pass,
            chain.extent,
            &vertex_code,
            &fragment_code,
        )?;

        let framebuffers = Framebuffers::new(&device, &render_pass, &chain.image_views, chain.extent)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Record one command buffer per chain image
        // ─────────────────────────────────────────────────────────────────────
        let commands = CommandPool::new(&device, chain.image_count())?;
        commands.record(
            &render_pass,
            &framebuffers,
            &pipeline,
            chain.extent,
            config.graphics.clear_color,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Semaphores for the frame loop
        // ─────────────────────────────────────────────────────────────────────
        let sync = SyncPrimitives::new(&device)?;
        let frame_driver = FrameDriver::new(sync.image_available, sync.render_finished);

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            frame_driver,
            resources: Resources {
                sync: Some(sync),
                commands: Some(commands),
                framebuffers: Some(framebuffers),
                pipeline: Some(pipeline),
                render_pass: Some(render_pass),
                chain: Some(chain),
                device: Some(device),
                surface: Some(surface),
                context: Some(context),
            },
        })
    }

    /// Acquire, submit and present one frame.
    pub fn draw_frame(&mut self) -> Result<()> {
        let resources = &self.resources;
        let device = resources.device.as_ref().context("Device not initialized")?;
        let chain = resources.chain.as_ref().context("Swapchain not initialized")?;
        let commands = resources
            .commands
            .as_ref()
            .context("Command buffers not initialized")?;

        let mut target = ChainTarget {
            device,
            chain,
            command_buffers: &commands.buffers,
        };

        let frame_driver = &mut self.frame_driver;
        if let Err(e) = frame_driver.draw_frame(&mut target) {
            let state = frame_driver.state();
            return Err(anyhow::Error::new(e).context(format!("frame stopped in state {:?}", state)));
        }
        Ok(())
    }

}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Cleaning up Vulkan resources after {} frames...",
            self.frame_driver.frames()
        );

        // Nothing may be destroyed while the GPU still uses it
        if let Some(ref device) = self.resources.device {
            if let Err(e) = device.wait_idle() {
                log::error!("Failed to wait for device idle: {}", e);
            }
        }

        self.resources.teardown();

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const CREATION: [Stage; 9] = [
        Stage::Context,
        Stage::Surface,
        Stage::Device,
        Stage::Chain,
        Stage::RenderPass,
        Stage::Pipeline,
        Stage::Framebuffers,
        Stage::Commands,
        Stage::Sync,
    ];

    /// Stages that must still be alive while `stage` is.
    fn depends_on(stage: Stage) -> &'static [Stage] {
        match stage {
            Stage::Context => &[],
            Stage::Surface => &[Stage::Context],
            Stage::Device => &[Stage::Context],
            Stage::Chain => &[Stage::Device, Stage::Surface],
            Stage::RenderPass => &[Stage::Device],
            Stage::Pipeline => &[Stage::Device, Stage::RenderPass],
            Stage::Framebuffers => &[Stage::Device, Stage::RenderPass, Stage::Chain],
            Stage::Commands => &[
                Stage::Device,
                Stage::Framebuffers,
                Stage::Pipeline,
                Stage::RenderPass,
            ],
            Stage::Sync => &[Stage::Device],
        }
    }

    /// Every stage exactly once, each released before anything it depends on.
    fn is_valid_teardown(order: &[Stage]) -> bool {
        let complete = CREATION
            .iter()
            .all(|stage| order.iter().filter(|s| *s == stage).count() == 1);

        complete
            && order.iter().enumerate().all(|(i, stage)| {
                depends_on(*stage)
                    .iter()
                    .all(|dep| order[i + 1..].contains(dep))
            })
    }

    // ── traced owners ─────────────────────────────────────────────────────

    type Trace = Rc<RefCell<Vec<Stage>>>;

    /// Stands in for a wrapper; records its stage when dropped.
    struct Traced {
        stage: Stage,
        trace: Trace,
    }

    impl Drop for Traced {
        fn drop(&mut self) {
            self.trace.borrow_mut().push(self.stage);
        }
    }

    struct TracedStages;

    impl StageTypes for TracedStages {
        type Context = Traced;
        type Surface = Traced;
        type Device = Traced;
        type Chain = Traced;
        type RenderPass = Traced;
        type Pipeline = Traced;
        type Framebuffers = Traced;
        type Commands = Traced;
        type Sync = Traced;
    }

    fn traced_resources(trace: &Trace) -> Resources<TracedStages> {
        let owner = |stage| Some(Traced { stage, trace: trace.clone() });
        Resources {
            sync: owner(Stage::Sync),
            commands: owner(Stage::Commands),
            framebuffers: owner(Stage::Framebuffers),
            pipeline: owner(Stage::Pipeline),
            render_pass: owner(Stage::RenderPass),
            chain: owner(Stage::Chain),
            device: owner(Stage::Device),
            surface: owner(Stage::Surface),
            context: owner(Stage::Context),
        }
    }

    // ── teardown ──────────────────────────────────────────────────────────

    #[test]
    fn teardown_releases_children_before_parents() {
        let trace = Trace::default();
        let mut resources = traced_resources(&trace);
        resources.teardown();

        let released = trace.borrow().clone();
        assert!(is_valid_teardown(&released), "bad release order {:?}", released);
        assert_eq!(released, Stage::TEARDOWN);
    }

    #[test]
    fn context_is_released_last() {
        let trace = Trace::default();
        drop(traced_resources(&trace));

        let released = trace.borrow();
        assert_eq!(released.last(), Some(&Stage::Context));
        let position = |stage| released.iter().position(|s| *s == stage);
        assert!(position(Stage::Device) < position(Stage::Surface));
        assert!(position(Stage::Chain) < position(Stage::Device));
    }

    #[test]
    fn dropping_resources_runs_the_same_teardown() {
        let trace = Trace::default();
        drop(traced_resources(&trace));
        assert_eq!(*trace.borrow(), Stage::TEARDOWN);
    }

    #[test]
    fn second_teardown_releases_nothing() {
        let trace = Trace::default();
        let mut resources = traced_resources(&trace);
        resources.teardown();
        resources.teardown();
        drop(resources);
        assert_eq!(trace.borrow().len(), Stage::TEARDOWN.len());
    }

    #[test]
    fn partially_built_resources_keep_the_order() {
        let trace = Trace::default();
        let owner = |stage| Some(Traced { stage, trace: trace.clone() });
        // Only the instance, surface and device were created
        let resources: Resources<TracedStages> = Resources {
            sync: None,
            commands: None,
            framebuffers: None,
            pipeline: None,
            render_pass: None,
            chain: None,
            device: owner(Stage::Device),
            surface: owner(Stage::Surface),
            context: owner(Stage::Context),
        };
        drop(resources);
        assert_eq!(
            *trace.borrow(),
            vec![Stage::Device, Stage::Surface, Stage::Context]
        );
    }

    // ── dependency table ──────────────────────────────────────────────────

    #[test]
    fn creation_order_respects_dependencies() {
        for (i, stage) in CREATION.iter().enumerate() {
            for dep in depends_on(*stage) {
                assert!(
                    CREATION[..i].contains(dep),
                    "{:?} is created before its dependency {:?}",
                    stage,
                    dep
                );
            }
        }
    }

    #[test]
    fn releasing_a_parent_first_is_rejected() {
        let mut order = Stage::TEARDOWN;
        // Device before the chain built on it
        order.swap(5, 6);
        assert!(!is_valid_teardown(&order));
        assert!(!is_valid_teardown(&CREATION));
    }

    #[test]
    fn incomplete_or_repeated_orders_are_rejected() {
        assert!(!is_valid_teardown(&Stage::TEARDOWN[1..]));

        let mut repeated = Stage::TEARDOWN;
        repeated[0] = Stage::Commands;
        assert!(!is_valid_teardown(&repeated));
    }
}
