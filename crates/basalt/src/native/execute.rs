//! Function creation and dispatch

use alloc::vec::Vec;

use basalt_cmd::FunctionBinding;
use basalt_core::{
    BufferBarrier, BufferId, Command, DispatchSize, Driver, Error, FenceId, FunctionId, QueueId,
    RawBuffer, Result,
};

use super::{FunctionRecord, NativeDevice};
use crate::device::Completion;
use crate::event::Event;
use crate::function::{Argument, Function};

/// A buffer argument resolved for one dispatch
#[derive(Debug, Clone, Copy)]
struct Target {
    id: BufferId,
    raw: RawBuffer,
    size: u64,
}

impl<D: Driver> NativeDevice<D> {
    pub(super) fn compile(&mut self, entry_point: &str, code: &[u8], parameter_count: u32) -> Result<Function> {
        self.ensure_usable(QueueId::DEFAULT)?;
        if entry_point.is_empty() {
            return Err(Error::InvalidParameter);
        }

        let shader = self.driver.create_shader(entry_point, code)?;
        self.next_function += 1;
        let id = FunctionId::new(self.next_function);
        self.functions.insert(
            id,
            FunctionRecord {
                shader,
                parameter_count,
                binding: None,
            },
        );

        log::debug!(
            "created function {:?} '{}' ({} parameters)",
            id,
            entry_point,
            parameter_count
        );
        Ok(Function::new(self.id, id, entry_point, parameter_count))
    }

    /// Release a function once its last dispatch has completed
    ///
    /// If the wait fails, the function's objects are retired on its last
    /// dispatch instead and released once that has passed.
    pub(super) fn release_function(&mut self, function: Function) -> Result<()> {
        self.check_device(function.device())?;
        let record = self
            .functions
            .remove(&function.id())
            .ok_or(Error::NotFound)?;
        let last_use = record
            .binding
            .map_or(FenceId::NONE, |binding| binding.last_use());

        if !self.queue.is_lost() {
            if let Err(err) = self.wait(last_use) {
                log::warn!(
                    "function '{}' retired on fence {}: {}",
                    function.entry_point(),
                    last_use,
                    err
                );
                self.retired_functions.push((last_use, record));
                return Err(err);
            }
        }

        record.destroy(&mut self.driver);
        Ok(())
    }

    pub(super) fn dispatch(
        &mut self,
        function: &mut Function,
        queue: QueueId,
        global_size: usize,
        local_size: usize,
        completion: Completion,
    ) -> Result<Option<Event>> {
        self.check_device(function.device())?;
        self.ensure_usable(queue)?;

        if global_size == 0 || local_size == 0 || local_size as u64 > self.spec.max_local_size {
            return Err(Error::InvalidParameter);
        }
        let size = DispatchSize {
            global: u32::try_from(global_size).map_err(|_| Error::InvalidParameter)?,
            local: u32::try_from(local_size).map_err(|_| Error::InvalidParameter)?,
        };

        if !self.functions.contains_key(&function.id()) {
            return Err(Error::NotFound);
        }

        let mut targets = Vec::with_capacity(function.arguments().len());
        for (slot, argument) in function.arguments().iter().enumerate() {
            // Native kernels only take buffer bindings
            let id = match argument {
                Some(Argument::Buffer(id)) => *id,
                Some(Argument::Value(_) | Argument::SharedMemory(_)) => return Err(Error::Unsupported),
                None => return Err(Error::MissingArgument(slot as u32)),
            };
            let state = self.buffers.get(id).ok_or(Error::NotFound)?;
            if state.mapping.is_mapped() {
                return Err(Error::BufferMapped);
            }
            targets.push(Target {
                id,
                raw: state.raw(),
                size: state.size(),
            });
        }

        let function_id = function.id();
        let fence = self.submit_with(|device| device.record_dispatch(function_id, &targets, size))?;

        for target in &targets {
            self.buffers.mark_used(target.id, fence)?;
        }
        if let Some(binding) = self
            .functions
            .get_mut(&function_id)
            .and_then(|record| record.binding.as_mut())
        {
            binding.set_last_use(fence);
        }
        function.clear_arguments();

        log::trace!(
            "dispatched '{}' over {} items ({} groups) on fence {}",
            function.entry_point(),
            size.global,
            size.workgroups(),
            fence
        );
        self.complete(fence, completion)
    }

    /// Pipeline objects of a function, created on first use
    fn ensure_binding(&mut self, function: FunctionId) -> Result<FunctionBinding> {
        let record = self.functions.get_mut(&function).ok_or(Error::NotFound)?;
        if let Some(binding) = record.binding {
            return Ok(binding);
        }

        let binding = FunctionBinding::create(&mut self.driver, record.shader, record.parameter_count)?;
        record.binding = Some(binding);
        Ok(binding)
    }

    /// Record binds, barriers and the dispatch into the open recording
    fn record_dispatch(&mut self, function: FunctionId, targets: &[Target], size: DispatchSize) -> Result<()> {
        let binding = self.ensure_binding(function)?;

        // The binding set may not change under a pending submission
        self.wait(binding.last_use())?;
        for (slot, target) in targets.iter().enumerate() {
            binding.bind(&mut self.driver, slot as u32, target.raw)?;
        }

        binding.record_bind(&mut self.recorder);
        let family = self.queue.family_index();
        for target in targets {
            self.recorder.record(Command::BufferBarrier(BufferBarrier::before_dispatch(
                target.raw,
                target.size,
                family,
            )));
        }
        self.recorder.record(Command::Dispatch(size));
        Ok(())
    }
}
