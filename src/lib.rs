//! Flow-record processing core: NetFlow v5 collection, a sidecar value
//! model and wire codec, IPFIX import/export over a frozen field schema,
//! an external k-way merge-sort, and a flow iterator tying input streams
//! together.
//!
//! Modules are organized by the pipeline stage they serve rather than by
//! wire format: [`netflow5`] is the only module that knows about UDP and
//! PDUs; everything downstream of it only deals in [`record::FlowRec`].

pub mod config;
pub mod error;
pub mod fixrec;
pub mod flow_iterator;
pub mod hash_table;
pub mod netflow5;
pub mod record;
pub mod sidecar;
pub mod sort;
pub mod value_store;

pub use error::{Error, Result};
pub use flow_iterator::{FlowInput, FlowIterator};
pub use record::{Addr, CopyScope, FlowRec, TCP_STATE_EXPANDED};
pub use value_store::{SidecarHandle, ValueStore};

use std::sync::{Arc, Mutex};

/// Convenience constructor for a fresh, empty [`ValueStore`] wrapped the
/// way [`FlowRec::new`] expects to receive it.
pub fn new_value_store() -> Arc<Mutex<ValueStore>> {
    Arc::new(Mutex::new(ValueStore::new()))
}
