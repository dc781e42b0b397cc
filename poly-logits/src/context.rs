/// Opaque handle to the device stream a host executes a step on. Processors pass it to the [`ExecutionContext`] and
/// never interpret or keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamHandle(usize);

impl StreamHandle {
	pub fn new(raw: usize) -> StreamHandle {
		StreamHandle(raw)
	}

	pub fn raw(&self) -> usize {
		self.0
	}
}

/// The backend's execution context for score mutations (e.g. a device stream that must be current while tensors
/// are written).
pub trait ExecutionContext {
	/// Make `stream` the current execution context
	fn enter(&self, stream: StreamHandle);

	/// Restore the execution context that was current before `enter`
	fn exit(&self, stream: StreamHandle);
}

/// Execution context for scores that live in host memory; entering and leaving does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostContext;

impl ExecutionContext for HostContext {
	fn enter(&self, _stream: StreamHandle) {}

	fn exit(&self, _stream: StreamHandle) {}
}

/// Keeps an execution context entered for as long as it lives. The context is exited when the scope is dropped,
/// which includes unwinding.
#[must_use = "the context is exited as soon as the scope is dropped"]
pub struct ContextScope<'a> {
	context: &'a dyn ExecutionContext,
	stream: StreamHandle,
}

impl<'a> ContextScope<'a> {
	pub fn enter(context: &'a dyn ExecutionContext, stream: StreamHandle) -> ContextScope<'a> {
		tracing::trace!(stream = stream.raw(), "entering execution context");
		context.enter(stream);
		ContextScope { context, stream }
	}
}

impl<'a> Drop for ContextScope<'a> {
	fn drop(&mut self) {
		self.context.exit(self.stream);
		tracing::trace!(stream = self.stream.raw(), "left execution context");
	}
}

/// Run `f` with `context` entered for `stream`
pub fn scoped<R>(context: &dyn ExecutionContext, stream: StreamHandle, f: impl FnOnce() -> R) -> R {
	let _scope = ContextScope::enter(context, stream);
	f()
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::panic::{catch_unwind, AssertUnwindSafe};

	use super::*;

	#[derive(Default)]
	struct RecordingContext {
		events: RefCell<Vec<(&'static str, usize)>>,
	}

	impl ExecutionContext for RecordingContext {
		fn enter(&self, stream: StreamHandle) {
			self.events.borrow_mut().push(("enter", stream.raw()));
		}

		fn exit(&self, stream: StreamHandle) {
			self.events.borrow_mut().push(("exit", stream.raw()));
		}
	}

	#[test]
	fn scope_enters_and_exits() {
		let context = RecordingContext::default();
		let value = scoped(&context, StreamHandle::new(7), || 42);
		assert_eq!(value, 42);
		assert_eq!(*context.events.borrow(), vec![("enter", 7), ("exit", 7)]);
	}

	#[test]
	fn scope_exits_on_panic() {
		let context = RecordingContext::default();
		let result = catch_unwind(AssertUnwindSafe(|| {
			scoped(&context, StreamHandle::new(3), || panic!("mutation failed"));
		}));
		assert!(result.is_err());
		assert_eq!(*context.events.borrow(), vec![("enter", 3), ("exit", 3)]);
	}
}
