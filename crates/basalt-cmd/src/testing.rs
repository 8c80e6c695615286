//! Minimal in-order driver for unit tests.

use alloc::string::String;
use alloc::vec::Vec;

use basalt_core::*;

#[derive(Debug)]
pub struct MockDriver {
    pub spec: DeviceSpec,
    pub next_handle: u64,
    pub signaled: Vec<(RawFence, bool)>,
    pub resets: Vec<RawFence>,
    pub submissions: Vec<(Vec<Command>, RawFence)>,
    pub failing_submits: u32,
    pub bindings: Vec<(RawBindingSet, u32, RawBuffer)>,
    pub pipelines_created: u32,
    pub destroyed_pipelines: u32,
    pub destroyed_sets: u32,
    pub fail_pipeline: bool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            spec: DeviceSpec {
                name: String::from("mock"),
                vendor: String::from("mock"),
                device_type: DeviceType::Cpu,
                source_types: SourceTypes::HOST,
                min_alignment: 4,
                max_num_queues: 1,
                global_mem_size: 1 << 20,
                local_mem_size: 1 << 10,
                max_alloc_size: 1 << 16,
                max_local_size: 64,
                has_fp16: false,
            },
            next_handle: 1,
            signaled: Vec::new(),
            resets: Vec::new(),
            submissions: Vec::new(),
            failing_submits: 0,
            bindings: Vec::new(),
            pipelines_created: 0,
            destroyed_pipelines: 0,
            destroyed_sets: 0,
            fail_pipeline: false,
        }
    }
}

impl MockDriver {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn fence_state(&mut self, fence: RawFence) -> &mut bool {
        let entry = self
            .signaled
            .iter_mut()
            .find(|(f, _)| *f == fence)
            .expect("unknown fence");
        &mut entry.1
    }
}

impl FenceDriver for MockDriver {
    fn create_fence(&mut self) -> Result<RawFence> {
        let fence = RawFence::new(self.handle());
        self.signaled.push((fence, false));
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: RawFence) {
        self.signaled.retain(|(f, _)| *f != fence);
    }

    fn reset_fence(&mut self, fence: RawFence) -> Result<()> {
        self.resets.push(fence);
        *self.fence_state(fence) = false;
        Ok(())
    }

    fn wait_fence(&mut self, fence: RawFence) -> Result<()> {
        if *self.fence_state(fence) {
            Ok(())
        } else {
            Err(Error::DeviceLost)
        }
    }

    fn fence_signaled(&mut self, fence: RawFence) -> Result<bool> {
        Ok(*self.fence_state(fence))
    }
}

impl Driver for MockDriver {
    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn queue_family_index(&self) -> u32 {
        0
    }

    fn create_buffer(&mut self, _size: u64, _flags: BufferFlags, _location: MemoryLocation) -> Result<RawBuffer> {
        Ok(RawBuffer::new(self.handle()))
    }

    fn destroy_buffer(&mut self, _buffer: RawBuffer) {}

    fn write_host_visible(&mut self, _buffer: RawBuffer, _offset: u64, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn read_host_visible(&mut self, _buffer: RawBuffer, _offset: u64, _dst: &mut [u8]) -> Result<()> {
        Ok(())
    }

    fn create_shader(&mut self, _entry_point: &str, _code: &[u8]) -> Result<RawShader> {
        Ok(RawShader::new(self.handle()))
    }

    fn destroy_shader(&mut self, _shader: RawShader) {}

    fn create_binding_set(&mut self, _bindings: u32) -> Result<RawBindingSet> {
        Ok(RawBindingSet::new(self.handle()))
    }

    fn update_binding(&mut self, set: RawBindingSet, slot: u32, buffer: RawBuffer) -> Result<()> {
        self.bindings.push((set, slot, buffer));
        Ok(())
    }

    fn destroy_binding_set(&mut self, _set: RawBindingSet) {
        self.destroyed_sets += 1;
    }

    fn create_pipeline(&mut self, _shader: RawShader, _layout: RawBindingSet) -> Result<RawPipeline> {
        if self.fail_pipeline {
            return Err(Error::PipelineCreationFailed);
        }
        self.pipelines_created += 1;
        Ok(RawPipeline::new(self.handle()))
    }

    fn destroy_pipeline(&mut self, _pipeline: RawPipeline) {
        self.destroyed_pipelines += 1;
    }

    fn submit(&mut self, commands: &[Command], fence: RawFence) -> Result<()> {
        if self.failing_submits > 0 {
            self.failing_submits -= 1;
            return Err(Error::SubmissionFailed);
        }
        self.submissions.push((commands.to_vec(), fence));
        *self.fence_state(fence) = true;
        Ok(())
    }
}
