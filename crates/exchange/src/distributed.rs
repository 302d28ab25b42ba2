//! In-process execution of a rank group.
//!
//! Each rank runs on its own OS thread with a [`LocalComm`] handle, so the
//! full message-passing protocols can be exercised without an MPI launcher.
//! Ranks share nothing but the closure they run and the messages they send.

use std::panic;
use std::thread;

use crate::comm::LocalComm;

/// Run `f` once per rank on `nranks` threads and collect the results by rank.
///
/// A panic on any rank is re-raised on the calling thread once every rank
/// has finished.
pub fn run_ranks<T, F>(nranks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    tracing::debug!("Launching {} ranks", nranks);
    let comms = LocalComm::group(nranks);
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();

        // Join everything before re-raising a panic
        let joined: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
        joined
            .into_iter()
            .map(|r| r.unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::Communicator;

    #[test]
    fn test_results_come_back_in_rank_order() {
        let ranks = run_ranks(6, |comm| comm.rank() * 10);
        assert_eq!(ranks, vec![0, 10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_single_rank_group() {
        let out = run_ranks(1, |comm| {
            comm.barrier().unwrap();
            comm.all_reduce_sum(3.0).unwrap()
        });
        assert_eq!(out, vec![3.0]);
    }

    #[test]
    #[should_panic(expected = "rank 2 failed")]
    fn test_rank_panic_propagates() {
        run_ranks(3, |comm| {
            if comm.rank() == 2 {
                panic!("rank 2 failed");
            }
        });
    }
}
