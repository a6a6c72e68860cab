//! Collective communication between cooperating processes.
//!
//! Rank [`ROOT`] coordinates: it computes once and publishes the result with
//! [`Communicator::broadcast`]. Every rank must enter each collective call in
//! the same order.

use {
    crate::error::{Error, Result},
    serde::{de::DeserializeOwned, Serialize},
    std::{
        sync::mpsc::{channel, Receiver, Sender},
        thread,
    },
};

/// The coordinating rank
pub const ROOT: usize = 0;

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Distributes the root's `value` to every rank. Only the root's argument
    /// is read; the other ranks pass `None`.
    fn broadcast<T: Serialize + DeserializeOwned>(&self, value: Option<&T>) -> Result<T>;

    /// Element-wise sum of `values` over all ranks, returned on every rank
    fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>>;
}

/// Collective check that every rank's `local` step succeeded.
///
/// A rank whose own step failed gets its error back; the others get
/// [`Error::Remote`] naming `step`. Every rank must call this together.
pub fn agree<C: Communicator, T>(comm: &C, local: Result<T>, step: &str) -> Result<T> {
    let failed = if local.is_err() { 1.0 } else { 0.0 };
    let failures = comm.all_reduce_sum(vec![failed])?[0];

    let value = local?;
    if failures > 0.0 {
        return Err(Error::Remote(format!("{} rank(s) failed to {}", failures, step)));
    }

    Ok(value)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Communication(format!("encoding payload: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Communication(format!("decoding payload: {}", e)))
}

fn missing_root_value() -> Error {
    Error::Communication("root rank must supply the broadcast value".into())
}

/// A lone process: collectives return their input
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast<T: Serialize + DeserializeOwned>(&self, value: Option<&T>) -> Result<T> {
        // Round-trip the payload so a lone process sees exactly what a group would
        decode(&encode(value.ok_or_else(missing_root_value)?)?)
    }

    fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>> {
        Ok(values)
    }
}

type Message = (usize, Vec<u8>);

/// One rank of a [`ThreadGroup`]
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    /// Indexed by destination rank. The root reaches every other rank, the
    /// others only the root.
    senders: Vec<Option<Sender<Message>>>,
    receiver: Receiver<Message>,
}

impl ThreadComm {
    fn send(&self, destination: usize, bytes: Vec<u8>) -> Result<()> {
        self.senders
            .get(destination)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                Error::Communication(format!("rank {} cannot reach rank {}", self.rank, destination))
            })?
            .send((self.rank, bytes))
            .map_err(|_| Error::Communication(format!("rank {} has hung up", destination)))
    }

    fn receive(&self) -> Result<Message> {
        self.receiver
            .recv()
            .map_err(|_| Error::Communication(format!("rank {} lost its peers", self.rank)))
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn broadcast<T: Serialize + DeserializeOwned>(&self, value: Option<&T>) -> Result<T> {
        if self.is_root() {
            let bytes = encode(value.ok_or_else(missing_root_value)?)?;
            for destination in (0..self.size()).filter(|r| *r != ROOT) {
                self.send(destination, bytes.clone())?;
            }
            decode(&bytes)
        } else {
            let (_, bytes) = self.receive()?;
            decode(&bytes)
        }
    }

    fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>> {
        if !self.is_root() {
            self.send(ROOT, encode(&values)?)?;
            let (_, bytes) = self.receive()?;
            return decode(&bytes);
        }

        let mut contributions = vec![None; self.size()];
        contributions[ROOT] = Some(values);
        for _ in 1..self.size() {
            let (source, bytes) = self.receive()?;
            contributions[source] = Some(decode::<Vec<f64>>(&bytes)?);
        }

        // Summed in rank order so every run of the group rounds identically
        let mut total: Option<Vec<f64>> = None;
        for (source, contribution) in contributions.into_iter().enumerate() {
            let contribution = contribution.ok_or_else(|| {
                Error::Communication(format!("no contribution from rank {}", source))
            })?;
            total = Some(match total {
                None => contribution,
                Some(mut sum) => {
                    if sum.len() != contribution.len() {
                        return Err(Error::Layout(format!(
                            "rank {} contributed {} values, expected {}",
                            source,
                            contribution.len(),
                            sum.len()
                        )));
                    }
                    sum.iter_mut().zip(&contribution).for_each(|(s, c)| *s += c);
                    sum
                }
            });
        }
        let total = total.unwrap_or_default();

        let bytes = encode(&total)?;
        for destination in (0..self.size()).filter(|r| *r != ROOT) {
            self.send(destination, bytes.clone())?;
        }

        Ok(total)
    }
}

/// In-process group of ranks connected by channels, one thread per rank
#[derive(Debug)]
pub struct ThreadGroup {
    comms: Vec<ThreadComm>,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Configuration("a thread group needs at least one rank".into()));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();

        let comms = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadComm {
                rank,
                senders: senders
                    .iter()
                    .enumerate()
                    .map(|(destination, sender)| {
                        if (rank == ROOT) != (destination == ROOT) {
                            Some(sender.clone())
                        } else {
                            None
                        }
                    })
                    .collect(),
                receiver,
            })
            .collect();

        Ok(ThreadGroup { comms })
    }

    pub fn size(&self) -> usize {
        self.comms.len()
    }

    /// Runs `f` on every rank concurrently, returning the results in rank order
    pub fn run<F, R>(self, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles = self
                .comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod test {
    use {super::*, serde::Deserialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        path: String,
        profile: Vec<f64>,
    }

    #[test]
    fn single_process() {
        let comm = SingleProcess;
        let payload = Payload {
            path: "checkpoint_s2.bin".into(),
            profile: vec![1.0, 2.0],
        };

        assert!(comm.is_root());
        assert_eq!(comm.broadcast(Some(&payload)).unwrap(), payload);
        assert_eq!(comm.all_reduce_sum(vec![3.0, 4.0]).unwrap(), vec![3.0, 4.0]);
        assert!(matches!(
            comm.broadcast::<Payload>(None),
            Err(Error::Communication(_))
        ));
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let payload = Payload {
            path: "checkpoint_s10.bin".into(),
            profile: vec![0.5, -0.5, 0.25],
        };

        let received = ThreadGroup::new(4).unwrap().run(|comm| {
            let value = if comm.is_root() { Some(&payload) } else { None };
            comm.broadcast(value).unwrap()
        });

        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|p| *p == payload));
    }

    #[test]
    fn all_reduce_sums_over_ranks() {
        let sums = ThreadGroup::new(3).unwrap().run(|comm| {
            let r = comm.rank() as f64;
            comm.all_reduce_sum(vec![r, 1.0]).unwrap()
        });

        for sum in sums {
            assert_eq!(sum, vec![3.0, 3.0]);
        }
    }

    #[test]
    fn repeated_collectives_stay_ordered() {
        let results = ThreadGroup::new(3).unwrap().run(|comm| {
            let mut seen = vec![];
            for round in 0..5 {
                let value = round as f64;
                let root_value = if comm.is_root() { Some(&value) } else { None };
                seen.push(comm.broadcast(root_value).unwrap());
                seen.push(comm.all_reduce_sum(vec![value]).unwrap()[0]);
            }
            seen
        });

        let expected = (0..5)
            .flat_map(|round| vec![round as f64, 3.0 * round as f64])
            .collect::<Vec<_>>();
        for seen in results {
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn mismatched_contributions() {
        let results = ThreadGroup::new(2).unwrap().run(|comm| {
            let values = vec![1.0; comm.rank() + 1];
            comm.all_reduce_sum(values).map(|_| ())
        });

        assert!(matches!(results[ROOT], Err(Error::Layout(_))));
        // The other rank loses its peer once the root gives up
        assert!(matches!(results[1], Err(Error::Communication(_))));
    }

    #[test]
    fn agreement_reports_failures_everywhere() {
        let results = ThreadGroup::new(3).unwrap().run(|comm| {
            let local = if comm.rank() == 2 {
                Err(Error::Layout("short column".into()))
            } else {
                Ok(comm.rank())
            };
            agree(&comm, local, "check their slices")
        });

        assert!(matches!(results[0], Err(Error::Remote(_))));
        assert!(matches!(results[1], Err(Error::Remote(_))));
        assert!(matches!(results[2], Err(Error::Layout(_))));

        let results = ThreadGroup::new(2)
            .unwrap()
            .run(|comm| agree(&comm, Ok(comm.rank()), "check their slices").unwrap());
        assert_eq!(results, vec![0, 1]);
    }

    #[test]
    fn empty_group() {
        assert!(ThreadGroup::new(0).is_err());
    }
}
