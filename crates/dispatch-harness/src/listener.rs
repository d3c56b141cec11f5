#![forbid(unsafe_code)]

//! Recording listeners and reference host types.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dispatch_core::{
    Callback, Declaration, Declare, DispatchError, Dispatcher, Emission, Flow, Property, Value,
};

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Record {
    pub emission: Emission,
    /// Which recorder method received it.
    pub via: &'static str,
}

impl Record {
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.emission.arg(index)
    }

    #[must_use]
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.emission.kwarg(key)
    }
}

/// Listener that records every call. Bind its methods with
/// [`Callback::method`]; it is never kept alive by a channel.
///
/// `on_event` returns whatever [`set_result`](Self::set_result) last set
/// (`true` by default), so a test can make it veto a dispatch.
#[derive(Debug)]
pub struct Recorder {
    records: RefCell<Vec<Record>>,
    result: Cell<bool>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            records: RefCell::new(Vec::new()),
            result: Cell::new(true),
        })
    }

    fn push(&self, emission: &Emission, via: &'static str) {
        self.records.borrow_mut().push(Record {
            emission: emission.clone(),
            via,
        });
    }

    pub fn on_event(&self, emission: &Emission) -> bool {
        self.push(emission, "on_event");
        self.result.get()
    }

    pub fn on_prop(&self, emission: &Emission) {
        self.push(emission, "on_prop");
    }

    pub fn on_other(&self, emission: &Emission) {
        self.push(emission, "on_other");
    }

    pub fn set_result(&self, result: bool) {
        self.result.set(result);
    }

    #[must_use]
    pub fn event_callback(self: &Rc<Self>) -> Callback {
        Callback::method(self, Self::on_event)
    }

    #[must_use]
    pub fn prop_callback(self: &Rc<Self>) -> Callback {
        Callback::method(self, Self::on_prop)
    }

    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.records.borrow().len()
    }

    /// Calls received through one method.
    #[must_use]
    pub fn count_via(&self, via: &str) -> usize {
        self.records.borrow().iter().filter(|r| r.via == via).count()
    }

    #[must_use]
    pub fn last(&self) -> Option<Record> {
        self.records.borrow().last().cloned()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

/// Host with three events, used for binding and emission tests.
pub struct Sender {
    dispatcher: Dispatcher,
}

impl Declare for Sender {
    fn declare(decl: &mut Declaration) {
        decl.events(["on_test_a", "on_test_b", "on_test_c"]);
    }
}

impl Sender {
    pub fn new() -> Result<Self, DispatchError> {
        Ok(Self {
            dispatcher: Dispatcher::new::<Self>()?,
        })
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Emit `name`, tagging the payload with `triggered_event = true`.
    pub fn trigger_event(&self, name: &str, emission: Emission) -> Result<Flow, DispatchError> {
        self.dispatcher
            .emit(name, emission.with_kwarg("triggered_event", true))
    }
}

/// Host with an integer `count` property and an `on_done` event.
pub struct Counter {
    dispatcher: Dispatcher,
}

impl Declare for Counter {
    fn declare(decl: &mut Declaration) {
        decl.event("on_done").property("count", Property::any(0));
    }
}

impl Counter {
    pub fn new() -> Result<Self, DispatchError> {
        Ok(Self {
            dispatcher: Dispatcher::new::<Self>()?,
        })
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn count(&self) -> Result<Value, DispatchError> {
        self.dispatcher.get("count")
    }

    pub fn set_count(&self, value: impl Into<Value>) -> Result<Flow, DispatchError> {
        self.dispatcher.set("count", value)
    }

    pub fn done(&self, message: &str) -> Result<Flow, DispatchError> {
        self.dispatcher.emit("on_done", Emission::with_args([message]))
    }
}
