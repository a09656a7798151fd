//! Presents several flow-record input streams as one sequence, unioning
//! their sidecar schemas before the first record is yielded.

use std::io;

use crate::record::FlowRec;
use crate::sidecar::SidecarSchema;

/// One input stream. A file-backed implementation wraps a reader and the
/// schema read from its header; a test or in-memory implementation can
/// just hold a `Vec<FlowRec>`.
pub trait FlowInput {
    fn schema(&self) -> &SidecarSchema;
    fn next_record(&mut self) -> io::Result<Option<FlowRec>>;
}

/// Callback slots a caller can install; all are optional and run
/// synchronously, matching the rest of the crate's "no async required"
/// stance for this single-threaded consumer-side API.
#[derive(Default)]
pub struct FlowIteratorHooks {
    pub pre_read: Option<Box<dyn FnMut(usize)>>,
    pub on_open_error: Option<Box<dyn FnMut(usize, &io::Error)>>,
    pub on_close: Option<Box<dyn FnMut(usize)>>,
}

pub struct FlowIterator {
    inputs: Vec<Box<dyn FlowInput>>,
    current: usize,
    schema: SidecarSchema,
    schema_built: bool,
    hooks: FlowIteratorHooks,
    max_open_streams: Option<usize>,
}

impl FlowIterator {
    pub fn new(inputs: Vec<Box<dyn FlowInput>>) -> Self {
        Self {
            inputs,
            current: 0,
            schema: SidecarSchema::new(),
            schema_built: false,
            hooks: FlowIteratorHooks::default(),
            max_open_streams: None,
        }
    }

    pub fn with_hooks(mut self, hooks: FlowIteratorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_open_streams(mut self, max: usize) -> Self {
        self.max_open_streams = Some(max);
        self
    }

    /// The unioned sidecar schema across every input, available once the
    /// first call to [`FlowIterator::next_flow`] has unioned them in.
    pub fn schema(&self) -> &SidecarSchema {
        &self.schema
    }

    fn ensure_schema_built(&mut self) -> Result<(), crate::sidecar::SidecarError> {
        if self.schema_built {
            return Ok(());
        }
        let limit = self.max_open_streams.unwrap_or(self.inputs.len());
        for input in self.inputs.iter().take(limit) {
            self.schema.union(input.schema())?;
        }
        self.schema_built = true;
        Ok(())
    }

    /// Returns the next record across all inputs in order, or `Ok(None)`
    /// once every input is exhausted.
    pub fn next_flow(&mut self) -> Result<Option<FlowRec>, crate::error::Error> {
        self.ensure_schema_built()?;
        while self.current < self.inputs.len() {
            if let Some(hook) = self.hooks.pre_read.as_mut() {
                hook(self.current);
            }
            match self.inputs[self.current].next_record() {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {
                    if let Some(hook) = self.hooks.on_close.as_mut() {
                        hook(self.current);
                    }
                    self.current += 1;
                }
                Err(e) => {
                    if let Some(hook) = self.hooks.on_open_error.as_mut() {
                        hook(self.current, &e);
                    }
                    return Err(crate::error::Error::Io(e));
                }
            }
        }
        Ok(None)
    }
}
