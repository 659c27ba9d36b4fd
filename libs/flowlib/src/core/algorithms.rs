// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stock algorithms: a vector-backed source, a closure transform and a
//! collecting sink. Enough to wire up pipelines in tests and small tools.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{FlowError, Result};
use crate::core::operator::{Algorithm, OperatorContext};
use crate::core::packet::{downcast_value, Packet};

/// Emits a fixed sequence on output 0, then finishes the output.
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T> Algorithm for VecSource<T>
where
    T: Any + Clone + Send + fmt::Debug,
{
    fn execute(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()> {
        while let Some(item) = self.items.pop_front() {
            if !ctx.push_data(0, Packet::data(item))? {
                // Backpressure or quota; the rest goes out next round.
                break;
            }
        }
        if self.items.is_empty() {
            ctx.finish_output(0)?;
        }
        Ok(())
    }

    fn is_done(&self) -> Option<bool> {
        Some(self.items.is_empty())
    }
}

/// Applies a closure to every data packet from input 0 and forwards the
/// result on output 0.
pub struct FnTransform<I, O, F> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnTransform<I, O, F>
where
    F: FnMut(I) -> O,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Algorithm for FnTransform<I, O, F>
where
    I: Any,
    O: Any + Clone + Send + fmt::Debug,
    F: FnMut(I) -> O + Send,
{
    fn execute(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()> {
        while let Some(packet) = ctx.poll_data(0)? {
            let Packet::Data(value) = packet else {
                continue;
            };
            let input = downcast_value::<I>(value).ok_or_else(|| {
                FlowError::Runtime("transform received a payload of an unexpected type".to_string())
            })?;
            let output = (self.f)(input);
            if !ctx.push_data(0, Packet::data(output))? {
                break;
            }
        }
        Ok(())
    }
}

/// Drains input 0 into a shared vector.
pub struct CollectSink<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectSink<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle for reading the collected values after (or while) running.
    pub fn handle(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.items)
    }
}

impl<T> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Algorithm for CollectSink<T>
where
    T: Any + Send,
{
    fn execute(&mut self, ctx: &mut OperatorContext<'_>) -> Result<()> {
        while let Some(packet) = ctx.poll_data(0)? {
            let Packet::Data(value) = packet else {
                continue;
            };
            let item = downcast_value::<T>(value).ok_or_else(|| {
                FlowError::Runtime("sink received a payload of an unexpected type".to_string())
            })?;
            self.items.lock().push(item);
        }
        Ok(())
    }
}
