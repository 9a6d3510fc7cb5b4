use synthpool_core::{Audio, Device, EngineError, SynthesisParams};

/// A loaded, expensive-to-create computation handle owned by exactly one worker.
///
/// Implementations wrap a specific text-to-audio model. Calls block the
/// worker thread for the full inference time.
pub trait SynthesisEngine: Send {
    /// Turn `text` into encoded audio.
    fn synthesize(&mut self, text: &str, params: &SynthesisParams) -> Result<Audio, EngineError>;
}

/// Creates one [`SynthesisEngine`] per worker at pool bootstrap.
pub trait EngineLoader: Send + Sync {
    /// Human-readable model name for logging and status.
    fn model_name(&self) -> &str;

    /// Map the configured device to the one the handle will actually use.
    ///
    /// `Auto` resolves to CPU unless the loader knows better.
    fn resolve_device(&self, requested: Device) -> Device {
        match requested {
            Device::Auto => Device::Cpu,
            other => other,
        }
    }

    /// Load a fresh handle for `worker_id` on `device`. May take seconds.
    fn load(&self, worker_id: usize, device: Device) -> Result<Box<dyn SynthesisEngine>, EngineError>;
}
