// Frame driver - the acquire/submit/present cycle
//
// The queue side sits behind `FrameTarget` so the protocol can be driven
// without a GPU. One semaphore pair is reused every frame and nothing waits
// on the CPU side; a frame's work may still be in flight when the next
// acquire begins.

use ash::vk;

use crate::error::FrameError;

/// Queue operations one frame needs.
pub trait FrameTarget {
    fn image_count(&self) -> usize;

    /// Returns `(image_index, suboptimal)`.
    fn acquire(&mut self, timeout: u64, signal: vk::Semaphore) -> Result<(u32, bool), FrameError>;

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
    ) -> Result<(), FrameError>;

    /// Returns `suboptimal`.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, FrameError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitted,
    Presented,
}

pub struct FrameDriver {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    state: FrameState,
    frames: u64,
    suboptimal_logged: bool,
}

impl FrameDriver {
    pub fn new(image_available: vk::Semaphore, render_finished: vk::Semaphore) -> Self {
        Self {
            image_available,
            render_finished,
            state: FrameState::Idle,
            frames: 0,
            suboptimal_logged: false,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames fully presented so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run one frame. Returns the image index that was presented.
    ///
    /// On error the state is left where the failure happened; the caller is
    /// expected to stop the loop.
    pub fn draw_frame<T: FrameTarget>(&mut self, target: &mut T) -> Result<u32, FrameError> {
        self.state = FrameState::Acquiring;
        let (image_index, acquire_suboptimal) = target.acquire(u64::MAX, self.image_available)?;

        let count = target.image_count();
        if image_index as usize >= count {
            return Err(FrameError::IndexOutOfRange { index: image_index, count });
        }

        target.submit(
            image_index,
            self.image_available,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            self.render_finished,
        )?;
        self.state = FrameState::Submitted;

        let present_suboptimal = target.present(image_index, self.render_finished)?;
        self.state = FrameState::Presented;

        if (acquire_suboptimal || present_suboptimal) && !self.suboptimal_logged {
            log::warn!("Swapchain is suboptimal for the surface; continuing with it");
            self.suboptimal_logged = true;
        }

        self.frames += 1;
        self.state = FrameState::Idle;
        Ok(image_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, PartialEq)]
    enum Call {
        Acquire { signal: vk::Semaphore },
        Submit { index: u32, wait: vk::Semaphore, stage: vk::PipelineStageFlags, signal: vk::Semaphore },
        Present { index: u32, wait: vk::Semaphore },
    }

    /// Hands out image indices round-robin and records every call.
    struct MockTarget {
        images: usize,
        next: u32,
        calls: Vec<Call>,
        force_index: Option<u32>,
        fail_present: Option<vk::Result>,
        suboptimal: bool,
    }

    impl MockTarget {
        fn new(images: usize) -> Self {
            Self {
                images,
                next: 0,
                calls: Vec::new(),
                force_index: None,
                fail_present: None,
                suboptimal: false,
            }
        }
    }

    impl FrameTarget for MockTarget {
        fn image_count(&self) -> usize {
            self.images
        }

        fn acquire(&mut self, timeout: u64, signal: vk::Semaphore) -> Result<(u32, bool), FrameError> {
            assert_eq!(timeout, u64::MAX);
            self.calls.push(Call::Acquire { signal });
            let index = self.force_index.unwrap_or(self.next);
            self.next = (self.next + 1) % self.images as u32;
            Ok((index, self.suboptimal))
        }

        fn submit(
            &mut self,
            image_index: u32,
            wait: vk::Semaphore,
            wait_stage: vk::PipelineStageFlags,
            signal: vk::Semaphore,
        ) -> Result<(), FrameError> {
            self.calls.push(Call::Submit { index: image_index, wait, stage: wait_stage, signal });
            Ok(())
        }

        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, FrameError> {
            self.calls.push(Call::Present { index: image_index, wait });
            match self.fail_present {
                Some(result) => Err(FrameError::Present { index: image_index, result }),
                None => Ok(false),
            }
        }
    }

    fn semaphores() -> (vk::Semaphore, vk::Semaphore) {
        (vk::Semaphore::from_raw(0x10), vk::Semaphore::from_raw(0x20))
    }

    #[test]
    fn one_frame_chains_the_two_semaphores() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(3);

        let index = driver.draw_frame(&mut target).unwrap();
        assert_eq!(index, 0);
        assert_eq!(
            target.calls,
            vec![
                Call::Acquire { signal: available },
                Call::Submit {
                    index: 0,
                    wait: available,
                    stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                    signal: finished,
                },
                Call::Present { index: 0, wait: finished },
            ]
        );
        assert_eq!(driver.state(), FrameState::Idle);
    }

    #[test]
    fn each_frame_issues_one_of_each_call() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(2);

        let presented: Vec<u32> = (0..5).map(|_| driver.draw_frame(&mut target).unwrap()).collect();
        assert_eq!(presented, vec![0, 1, 0, 1, 0]);
        assert_eq!(driver.frames(), 5);

        let acquires = target.calls.iter().filter(|c| matches!(c, Call::Acquire { .. })).count();
        let submits = target.calls.iter().filter(|c| matches!(c, Call::Submit { .. })).count();
        let presents = target.calls.iter().filter(|c| matches!(c, Call::Present { .. })).count();
        assert_eq!((acquires, submits, presents), (5, 5, 5));
    }

    #[test]
    fn submit_and_present_use_the_acquired_index() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(4);
        target.force_index = Some(2);

        driver.draw_frame(&mut target).unwrap();
        assert!(matches!(target.calls[1], Call::Submit { index: 2, .. }));
        assert!(matches!(target.calls[2], Call::Present { index: 2, .. }));
    }

    #[test]
    fn out_of_range_index_stops_before_submit() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(2);
        target.force_index = Some(7);

        let err = driver.draw_frame(&mut target).unwrap_err();
        assert!(matches!(err, FrameError::IndexOutOfRange { index: 7, count: 2 }));
        assert_eq!(target.calls.len(), 1);
        assert_eq!(driver.state(), FrameState::Acquiring);
        assert_eq!(driver.frames(), 0);
    }

    #[test]
    fn present_failure_is_reported_after_submit() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(2);
        target.fail_present = Some(vk::Result::ERROR_OUT_OF_DATE_KHR);

        let err = driver.draw_frame(&mut target).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Present { index: 0, result: vk::Result::ERROR_OUT_OF_DATE_KHR }
        ));
        assert_eq!(driver.state(), FrameState::Submitted);
    }

    #[test]
    fn suboptimal_frames_still_present() {
        let (available, finished) = semaphores();
        let mut driver = FrameDriver::new(available, finished);
        let mut target = MockTarget::new(2);
        target.suboptimal = true;

        driver.draw_frame(&mut target).unwrap();
        driver.draw_frame(&mut target).unwrap();
        assert_eq!(driver.frames(), 2);
        assert!(driver.suboptimal_logged);
    }
}
