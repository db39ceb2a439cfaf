//! Head-of-line response ordering for pipelined HTTP/1.1.
//!
//! Responses may complete in any order, but an HTTP/1.1 byte stream must
//! carry them in request order. The orderer buffers early completions and
//! releases a contiguous run as soon as the response at the front of the
//! line arrives.

use std::collections::HashMap;

use log::error;

use crate::message::HttpResponse;

/// Outcome of submitting a response to the orderer.
#[derive(Debug)]
pub(crate) enum Submission {
    /// The submitted response, and any buffered successors it unblocked,
    /// tagged with their sequence numbers in emission order.
    Emit(Vec<(u32, HttpResponse)>),
    /// An earlier response is still outstanding; the submission was
    /// buffered.
    Buffered,
}

/// Orders responses by request sequence number.
///
/// `res_seq` is the sequence of the oldest request whose response has not
/// been written; every buffered key lies in `[res_seq, next unissued seq)`.
#[derive(Default)]
pub(crate) struct ResponseOrderer {
    res_seq: u32,
    pending: HashMap<u32, HttpResponse>,
}

impl ResponseOrderer {
    /// Number of buffered out-of-order responses.
    pub(crate) fn pending_len(&self) -> usize { self.pending.len() }

    /// Submit the response for request `seq`.
    ///
    /// In-order submissions emit immediately, followed by every buffered
    /// successor that is now contiguous. Out-of-order submissions are
    /// buffered; a collision with an already-buffered sequence is logged
    /// and the displaced response dropped, which can only happen after
    /// sequence wraparound.
    pub(crate) fn submit(&mut self, seq: u32, res: HttpResponse) -> Submission {
        if seq != self.res_seq {
            if let Some(orphan) = self.pending.insert(seq, res) {
                error!("orphaned pending response: seq={seq}, status={}", orphan.status());
            }
            return Submission::Buffered;
        }

        let mut emitted = vec![(seq, res)];
        self.res_seq = self.res_seq.wrapping_add(1);
        while let Some(next) = self.pending.remove(&self.res_seq) {
            emitted.push((self.res_seq, next));
            self.res_seq = self.res_seq.wrapping_add(1);
        }
        Submission::Emit(emitted)
    }
}
