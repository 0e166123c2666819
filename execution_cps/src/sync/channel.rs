// Copyright 2026 the Execution Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::engine::{self, Cont, Step};
use crate::error::{EngineError, ErrorKind, Result};
use crate::types::{self, TypeRef};
use crate::value::{Object, Value};

#[derive(Debug, Default)]
struct State {
    receiver: Option<Cont>,
    messages: VecDeque<(Cont, Value)>,
    /// The head message has been handed to the receiver but not yet acknowledged.
    delivered: bool,
    open: bool,
    closing: Option<Value>,
}

/// Rendezvous channel between a generator and a receiver.
///
/// A sender parks until the receiver acknowledges its message with [`next`](Self::next), whose
/// reply becomes the result of the send. When the generator started by [`start`](Self::start)
/// returns, the channel closes and its return value is delivered to the receiver as the last value.
#[derive(Debug, Default)]
pub struct Channel {
    state: Mutex<State>,
}

enum Wake {
    Nothing,
    Receiver(Cont, Value),
}

impl Channel {
    /// Creates a closed channel.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Opens the channel and runs `generator(args)` with `caller` as the receiver.
    ///
    /// `caller` is resumed with the first message, or with the generator's return value if it
    /// returns without sending.
    pub fn start(self: &Arc<Self>, caller: Cont, generator: &Value, args: Vec<Value>) {
        let context = caller.context().clone();
        let refused = {
            let mut state = self.state.lock();
            if state.open || state.receiver.is_some() || !state.messages.is_empty() {
                Some(caller)
            } else {
                state.open = true;
                state.closing = None;
                state.receiver = Some(caller);
                None
            }
        };
        if let Some(caller) = refused {
            let err = Value::error(ErrorKind::State, "Channel is already running");
            return engine::resume(caller, err);
        }
        let end = Box::new(ChannelEnd {
            context,
            channel: Arc::clone(self),
        });
        engine::call(end, generator, args);
    }

    /// Offers `value` to the receiver; `sender` resumes with the receiver's reply.
    pub fn send(&self, sender: Cont, value: Value) {
        let wake = {
            let mut state = self.state.lock();
            if !state.open {
                drop(state);
                return engine::resume(sender, EngineError::ChannelClosed.into());
            }
            state.messages.push_back((sender, value.clone()));
            match state.receiver.take() {
                Some(receiver) if state.messages.len() == 1 => {
                    state.delivered = true;
                    Wake::Receiver(receiver, value)
                }
                other => {
                    state.receiver = other;
                    Wake::Nothing
                }
            }
        };
        wake.run();
    }

    /// Acknowledges the current message with `reply` and waits for the following one.
    ///
    /// Once the channel is closed and drained, `caller` receives the generator's return value; a
    /// further `next` fails with a `ChannelError`.
    pub fn next(&self, caller: Cont, reply: Value) {
        let (sender, wake) = {
            let mut state = self.state.lock();
            let sender = if state.delivered {
                state.delivered = false;
                state.messages.pop_front().map(|(sender, _)| sender)
            } else {
                None
            };
            let wake = if let Some((_, value)) = state.messages.front() {
                let value = value.clone();
                state.delivered = true;
                Wake::Receiver(caller, value)
            } else if !state.open {
                match state.closing.take() {
                    Some(last) => Wake::Receiver(caller, last),
                    None => Wake::Receiver(caller, EngineError::ChannelClosed.into()),
                }
            } else if state.receiver.is_some() {
                let err = Value::error(ErrorKind::State, "Channel already has a receiver");
                Wake::Receiver(caller, err)
            } else {
                state.receiver = Some(caller);
                Wake::Nothing
            };
            (sender, wake)
        };
        if let Some(sender) = sender {
            engine::resume(sender, reply);
        }
        wake.run();
    }

    /// Returns `true` while values remain to be received.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        state.open || !state.messages.is_empty()
    }

    /// Closes the channel with a final value for the receiver.
    ///
    /// Messages already sent are still delivered first.
    pub fn close(&self, last: Value) -> Result<()> {
        let wake = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(EngineError::ChannelClosed);
            }
            state.open = false;
            match state.receiver.take() {
                Some(receiver) if state.messages.is_empty() => Wake::Receiver(receiver, last),
                other => {
                    state.receiver = other;
                    state.closing = Some(last);
                    Wake::Nothing
                }
            }
        };
        wake.run();
        Ok(())
    }
}

impl Wake {
    fn run(self) {
        if let Self::Receiver(receiver, value) = self {
            engine::resume(receiver, value);
        }
    }
}

impl Object for Channel {
    fn type_of(&self) -> TypeRef {
        types::CHANNEL.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Continuation a generator returns to; closes its channel.
struct ChannelEnd {
    context: Context,
    channel: Arc<Channel>,
}

impl Step for ChannelEnd {
    fn context(&self) -> &Context {
        &self.context
    }

    fn resume(self: Box<Self>, value: Value) {
        if self.channel.close(value).is_err() {
            tracing::debug!("generator returned after its channel was closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Capture;

    /// A generator sending `1..=n`, summing the replies, and returning the sum.
    fn counting_generator(channel: &Arc<Channel>, n: i64) -> Value {
        fn send_from(channel: Arc<Channel>, caller: Cont, i: i64, n: i64, sum: i64) {
            if i > n {
                return engine::resume(caller, Value::Int(sum));
            }
            let next = Arc::clone(&channel);
            channel.send(
                engine::then(caller, move |caller, reply| {
                    let sum = sum + reply.as_int().unwrap_or(0);
                    send_from(next, caller, i + 1, n, sum);
                }),
                Value::Int(i),
            );
        }
        let channel = Arc::clone(channel);
        Value::function_x(move |caller, _| send_from(Arc::clone(&channel), caller, 1, n, 0))
    }

    #[test]
    fn generator_values_rendezvous_with_the_receiver() {
        let context = Context::root();
        let channel = Channel::new();
        let capture = Capture::new(&context);
        channel.start(capture.cont(), &counting_generator(&channel, 3), Vec::new());
        assert_eq!(capture.take(), Some(Value::Int(1)));
        assert!(channel.is_open());
        channel.next(capture.cont(), Value::Int(10));
        assert_eq!(capture.take(), Some(Value::Int(2)));
        channel.next(capture.cont(), Value::Int(20));
        assert_eq!(capture.take(), Some(Value::Int(3)));
        channel.next(capture.cont(), Value::Int(30));
        assert_eq!(capture.take(), Some(Value::Int(60)));
        assert!(!channel.is_open());
        channel.next(capture.cont(), Value::Nil);
        let err = capture.take().expect("closed channel answers");
        assert!(err.as_error().is_some_and(|e| e.is(ErrorKind::Channel)));
    }

    #[test]
    fn empty_generator_delivers_its_return_value() {
        let context = Context::root();
        let channel = Channel::new();
        let capture = Capture::new(&context);
        channel.start(capture.cont(), &Value::function(|_| Value::str("done")), Vec::new());
        assert_eq!(capture.take(), Some(Value::str("done")));
        assert!(!channel.is_open());
    }

    #[test]
    fn sending_on_a_closed_channel_is_an_error() {
        let context = Context::root();
        let channel = Channel::new();
        let capture = Capture::new(&context);
        channel.send(capture.cont(), Value::Int(1));
        let err = capture.take().expect("send answered");
        let err = err.as_error().expect("error value");
        assert_eq!(err.message(), "Channel is not open");
        assert!(channel.close(Value::Nil).is_err());
    }

    #[test]
    fn restarting_a_running_channel_is_refused() {
        let context = Context::root();
        let channel = Channel::new();
        let receiver = Capture::new(&context);
        let park = Value::function_x(|caller, _| drop(caller));
        channel.start(receiver.cont(), &park, Vec::new());
        let second = Capture::new(&context);
        channel.start(second.cont(), &park, Vec::new());
        assert!(second.take().is_some_and(|v| v.is_error()));
        channel.close(Value::Int(0)).expect("open");
        assert_eq!(receiver.take(), Some(Value::Int(0)));
    }
}
