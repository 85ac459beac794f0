//! The in-memory batch of pending mutations.

use crate::protocol::{Parser, Request};

/// Fixed per-item serialization overhead counted toward `byte_size`,
/// independent of argument lengths.
pub const ITEM_OVERHEAD_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Some chunks of the input did not parse; the requests that did are
    /// still present in the batch.
    #[error("has unparsed requests")]
    HasUnparsedRequests,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    /// The batch contained a request that must never be serialized to the
    /// WAL (a `GET`, or an `Invalid` sentinel); it was skipped.
    #[error("batch contained a non-mutation request; it was skipped")]
    SkippedNonMutation,
}

/// A mutable, ordered buffer of pending mutations.
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<Request>,
    byte_size: usize,
    max_bytes: usize,
}

impl Batch {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            items: Vec::new(),
            byte_size: 0,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn items(&self) -> &[Request] {
        &self.items
    }

    pub fn add(&mut self, req: Request) {
        self.byte_size += ITEM_OVERHEAD_BYTES + req.args.iter().map(|a| a.len()).sum::<usize>();
        self.items.push(req);
    }

    /// Strictly greater than `max_bytes`: a batch sitting exactly at the
    /// watermark is not yet full.
    pub fn is_full(&self) -> bool {
        self.byte_size > self.max_bytes
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.byte_size = 0;
    }

    /// Emit each request as `COMMAND ARG[ ARG]\n`. `GET`/`Invalid`
    /// requests are never batched and must not appear here; if one does,
    /// it is skipped and the flush reports a partial error.
    pub fn serialize(&self) -> (Vec<u8>, Result<(), SerializeError>) {
        let mut out = Vec::with_capacity(self.byte_size);
        let mut skipped = false;

        for req in &self.items {
            if !req.kind.is_mutation() {
                skipped = true;
                continue;
            }
            out.extend_from_slice(req.kind.as_str().as_bytes());
            for arg in &req.args {
                out.push(b' ');
                out.extend_from_slice(arg.as_bytes());
            }
            out.push(b'\n');
        }

        if skipped {
            (out, Err(SerializeError::SkippedNonMutation))
        } else {
            (out, Ok(()))
        }
    }

    /// Parse a serialized segment back into requests, appending whichever
    /// records parse. Invalid chunks are skipped; if any were skipped, the
    /// call reports [`LoadError::HasUnparsedRequests`] while retaining the
    /// good ones (used at recovery and at replica replay).
    pub fn load_bytes(&mut self, data: &[u8]) -> Result<(), LoadError> {
        let text = String::from_utf8_lossy(data);
        let mut had_bad_chunk = false;

        for chunk in text.split('\n') {
            if chunk.is_empty() {
                continue;
            }
            match Parser::parse(chunk) {
                Ok(req) if req.kind.is_mutation() => self.add(req),
                Ok(_) => had_bad_chunk = true,
                Err(_) => had_bad_chunk = true,
            }
        }

        if had_bad_chunk {
            Err(LoadError::HasUnparsedRequests)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_increases_byte_size_by_overhead_plus_arg_lengths() {
        let mut batch = Batch::new(1024);
        batch.add(Request::set("k", "v"));
        assert_eq!(batch.byte_size(), ITEM_OVERHEAD_BYTES + 1 + 1);
    }

    #[test]
    fn is_full_requires_strictly_greater_than_max() {
        let mut batch = Batch::new(ITEM_OVERHEAD_BYTES + 2);
        batch.add(Request::set("k", "v"));
        assert!(!batch.is_full(), "equal to max must not be full");
        batch.add(Request::del("x"));
        assert!(batch.is_full());
    }

    #[test]
    fn serialize_round_trips_through_load_bytes() {
        let mut batch = Batch::new(1024);
        batch.add(Request::set("a", "1"));
        batch.add(Request::del("b"));
        let (bytes, result) = batch.serialize();
        assert!(result.is_ok());
        assert_eq!(bytes, b"SET a 1\nDEL b\n");

        let mut recovered = Batch::new(1024);
        recovered.load_bytes(&bytes).unwrap();
        assert_eq!(recovered.items(), batch.items());
    }

    #[test]
    fn serialize_skips_get_requests_and_reports_partial_error() {
        let mut batch = Batch::new(1024);
        batch.add(Request::set("a", "1"));
        batch.add(Request::get("a"));
        let (bytes, result) = batch.serialize();
        assert!(result.is_err());
        assert_eq!(bytes, b"SET a 1\n");
    }

    #[test]
    fn load_bytes_skips_unparseable_chunks_but_keeps_good_ones() {
        let mut batch = Batch::new(1024);
        let data = b"SET a 1\nGARBAGE\nDEL b\n";
        let result = batch.load_bytes(data);
        assert!(result.is_err());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.items()[0], Request::set("a", "1"));
        assert_eq!(batch.items()[1], Request::del("b"));
    }

    #[test]
    fn load_bytes_on_truncated_trailing_data_is_defined() {
        let mut batch = Batch::new(1024);
        // partial trailing record, as if the writer crashed mid-flush
        let data = b"SET a 1\nSET b";
        let result = batch.load_bytes(data);
        assert!(result.is_err());
        assert_eq!(batch.len(), 1);
    }

    fn arb_mutation() -> impl proptest::strategy::Strategy<Value = Request> {
        use proptest::prelude::*;
        prop_oneof![
            ("[a-zA-Z0-9_]{1,12}", "[a-zA-Z0-9_]{1,12}").prop_map(|(k, v)| Request::set(k, v)),
            "[a-zA-Z0-9_]{1,12}".prop_map(Request::del),
        ]
    }

    proptest::proptest! {
        /// R1: serializing any sequence of SET/DEL requests and loading it
        /// back yields the original sequence, in order, arguments intact.
        #[test]
        fn serialize_then_load_bytes_round_trips_arbitrary_mutation_sequences(
            reqs in proptest::collection::vec(arb_mutation(), 0..20)
        ) {
            let mut batch = Batch::new(usize::MAX);
            for req in &reqs {
                batch.add(req.clone());
            }
            let (bytes, result) = batch.serialize();
            proptest::prop_assert!(result.is_ok());

            let mut recovered = Batch::new(usize::MAX);
            let load_result = recovered.load_bytes(&bytes);
            proptest::prop_assert!(load_result.is_ok());
            proptest::prop_assert_eq!(recovered.items(), reqs.as_slice());
        }
    }
}
