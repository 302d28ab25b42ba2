//! Thread-backed communicator: one rank per thread, messages over channels.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};

use super::{tags, CommError, Communicator, Envelope, Message, Tag};

struct Packet {
    source: usize,
    tag: Tag,
    /// `None` when the source handle was dropped.
    payload: Option<Vec<u8>>,
}

/// Rank handle of an in-process group created by [`LocalComm::group`].
///
/// Sends never block. Messages that arrive before they are asked for are
/// stashed per `(source, tag)` in arrival order. Collectives exchange every
/// contribution and fold them in rank order, so all ranks compute
/// bit-identical results.
///
/// Dropping a handle tells every peer, so a rank that returns early (on an
/// error or a panic) makes pending receives from it fail with
/// [`CommError::Disconnected`] instead of blocking.
pub struct LocalComm {
    rank: usize,
    size: usize,
    /// Indexed by destination rank; `None` at our own rank.
    outboxes: Vec<Option<Sender<Packet>>>,
    inbox: Receiver<Packet>,
    stash: RefCell<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    departed: RefCell<HashSet<usize>>,
}

impl LocalComm {
    /// Create `size` connected rank handles, indexed by rank.
    pub fn group(size: usize) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                size,
                outboxes: senders
                    .iter()
                    .enumerate()
                    .map(|(dest, tx)| (dest != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                stash: RefCell::new(HashMap::new()),
                departed: RefCell::new(HashSet::new()),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer == self.rank || peer >= self.size {
            return Err(CommError::InvalidPeer {
                peer,
                size: self.size,
            });
        }
        Ok(())
    }

    fn post(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<(), CommError> {
        self.check_peer(dest)?;
        let outbox = self.outboxes[dest]
            .as_ref()
            .ok_or(CommError::InvalidPeer { peer: dest, size: self.size })?;
        outbox
            .send(Packet {
                source: self.rank,
                tag,
                payload: Some(payload),
            })
            .map_err(|_| CommError::Disconnected(dest))
    }

    fn wait_for(&self, source: usize, tag: Tag) -> Result<Vec<u8>, CommError> {
        self.check_peer(source)?;
        if let Some(payload) = self
            .stash
            .borrow_mut()
            .get_mut(&(source, tag))
            .and_then(VecDeque::pop_front)
        {
            return Ok(payload);
        }
        // Messages from one source arrive in order, so nothing follows a hangup
        if self.departed.borrow().contains(&source) {
            return Err(CommError::Disconnected(source));
        }
        loop {
            let packet = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected(source))?;
            let Some(payload) = packet.payload else {
                if packet.source == source {
                    return Err(CommError::Disconnected(source));
                }
                self.departed.borrow_mut().insert(packet.source);
                continue;
            };
            if packet.source == source && packet.tag == tag {
                return Ok(payload);
            }
            self.stash
                .borrow_mut()
                .entry((packet.source, packet.tag))
                .or_default()
                .push_back(payload);
        }
    }

    /// Every rank's contribution, indexed by rank.
    fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, CommError> {
        for dest in (0..self.size).filter(|&r| r != self.rank) {
            self.post(dest, tags::COLLECTIVE, local.to_vec())?;
        }
        (0..self.size)
            .map(|src| {
                if src == self.rank {
                    Ok(local.to_vec())
                } else {
                    self.wait_for(src, tags::COLLECTIVE)
                }
            })
            .collect()
    }

    fn gather_scalars(&self, local: f64) -> Result<Vec<f64>, CommError> {
        let parts = self.all_gather(bytemuck::bytes_of(&local))?;
        parts
            .iter()
            .enumerate()
            .map(|(peer, bytes)| {
                if bytes.len() != 8 {
                    return Err(CommError::CollectiveShape {
                        peer,
                        expected: 8,
                        got: bytes.len(),
                    });
                }
                Ok(bytemuck::pod_read_unaligned::<f64>(bytes))
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange(&self, sends: &[Message<'_>], recvs: &[Envelope]) -> Result<Vec<Vec<u8>>, CommError> {
        for m in sends {
            self.post(m.dest, m.tag, m.payload.to_vec())?;
        }
        recvs.iter().map(|e| self.wait_for(e.source, e.tag)).collect()
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64, CommError> {
        Ok(self.gather_scalars(local)?.into_iter().fold(0.0, |acc, v| acc + v))
    }

    fn all_reduce_max(&self, local: f64) -> Result<f64, CommError> {
        Ok(self
            .gather_scalars(local)?
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<(), CommError> {
        let parts = self.all_gather(bytemuck::cast_slice(&*local))?;
        let expected = local.len() * 8;
        if let Some((peer, bytes)) = parts.iter().enumerate().find(|(_, b)| b.len() != expected) {
            return Err(CommError::CollectiveShape {
                peer,
                expected,
                got: bytes.len(),
            });
        }
        local.iter_mut().for_each(|v| *v = 0.0);
        for bytes in &parts {
            for (acc, chunk) in local.iter_mut().zip(bytes.chunks_exact(8)) {
                *acc += bytemuck::pod_read_unaligned::<f64>(chunk);
            }
        }
        Ok(())
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.all_gather(&[]).map(|_| ())
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        for outbox in self.outboxes.iter().flatten() {
            // A peer that already dropped its inbox needs no notice
            let _ = outbox.send(Packet {
                source: self.rank,
                tag: tags::COLLECTIVE,
                payload: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::run_ranks;

    #[test]
    fn group_ranks_are_numbered() {
        let group = LocalComm::group(3);
        assert_eq!(group.len(), 3);
        for (r, c) in group.iter().enumerate() {
            assert_eq!(c.rank(), r);
            assert_eq!(c.size(), 3);
        }
    }

    #[test]
    fn ring_exchange_delivers_payloads() {
        let out = run_ranks(4, |comm| {
            let me = comm.rank();
            let n = comm.size();
            let right = (me + 1) % n;
            let left = (me + n - 1) % n;
            let payload = [me as u8; 3];
            let got = comm
                .exchange(
                    &[Message { dest: right, tag: 7, payload: &payload }],
                    &[Envelope { source: left, tag: 7 }],
                )
                .unwrap();
            got[0].clone()
        });
        for (me, got) in out.iter().enumerate() {
            assert_eq!(got, &vec![((me + 3) % 4) as u8; 3]);
        }
    }

    #[test]
    fn out_of_order_tags_are_stashed() {
        let out = run_ranks(2, |comm| {
            let peer = 1 - comm.rank();
            let a = [1u8];
            let b = [2u8];
            // Receive in the reverse order of sending
            comm.exchange(
                &[Message { dest: peer, tag: 1, payload: &a }, Message { dest: peer, tag: 2, payload: &b }],
                &[Envelope { source: peer, tag: 2 }, Envelope { source: peer, tag: 1 }],
            )
            .unwrap()
        });
        for got in out {
            assert_eq!(got, vec![vec![2u8], vec![1u8]]);
        }
    }

    #[test]
    fn collectives_agree_on_every_rank() {
        let out = run_ranks(5, |comm| {
            let x = comm.rank() as f64 + 0.1;
            let sum = comm.all_reduce_sum(x).unwrap();
            let max = comm.all_reduce_max(x).unwrap();
            let mut v = vec![comm.rank() as f64, 1.0];
            comm.all_reduce_sum_vec(&mut v).unwrap();
            comm.barrier().unwrap();
            (sum, max, v)
        });
        for (sum, max, v) in &out {
            assert_eq!(sum.to_bits(), out[0].0.to_bits(), "sums must be bit-identical");
            assert!((sum - 10.5).abs() < 1e-12);
            assert_eq!(*max, 4.1);
            assert_eq!(v, &vec![10.0, 5.0]);
        }
    }

    #[test]
    fn early_return_disconnects_waiting_peers() {
        let out = run_ranks(4, |comm| {
            if comm.rank() == 0 {
                return Ok(Vec::new());
            }
            comm.exchange(&[], &[Envelope { source: 0, tag: 5 }])
        });
        assert!(out[0].is_ok());
        for (rank, result) in out.iter().enumerate().skip(1) {
            assert!(
                matches!(result, Err(CommError::Disconnected(0))),
                "rank {rank} returned {result:?}"
            );
        }
    }

    #[test]
    fn messages_sent_before_a_hangup_are_delivered() {
        let out = run_ranks(3, |comm| {
            if comm.rank() == 0 {
                for dest in 1..3 {
                    comm.exchange(&[Message { dest, tag: 9, payload: &[42] }], &[])?;
                }
                return Ok(Vec::new());
            }
            // The payload is queued ahead of rank 0's hangup whenever it exits
            comm.exchange(&[], &[Envelope { source: 0, tag: 9 }])
        });
        for result in &out[1..] {
            assert_eq!(result.as_ref().unwrap(), &vec![vec![42u8]]);
        }
    }

    #[test]
    fn failed_vector_reduction_leaves_input_untouched() {
        let out = run_ranks(2, |comm| {
            let mut v = vec![1.0; 2 + comm.rank()];
            let result = comm.all_reduce_sum_vec(&mut v);
            (result, v)
        });
        for (rank, (result, v)) in out.into_iter().enumerate() {
            assert!(matches!(result, Err(CommError::CollectiveShape { .. })), "rank {rank}");
            assert!(v.iter().all(|&x| x == 1.0), "rank {rank} clobbered {v:?}");
        }
    }

    #[test]
    fn self_messages_are_rejected() {
        let group = LocalComm::group(2);
        let err = group[0]
            .exchange(&[Message { dest: 0, tag: 1, payload: &[] }], &[])
            .unwrap_err();
        assert!(matches!(err, CommError::InvalidPeer { peer: 0, size: 2 }));
    }
}
