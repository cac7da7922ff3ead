//! Runs one task per vertex of a dependency DAG on a bounded pool of threads. A vertex starts
//! once every vertex it depends on has finished successfully.

use arbor_common::config::ScheduleOptions;
use crossbeam_channel as channel;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskResult<T> {
    Value(T),
    /// The task returned an error or panicked.
    ExecutionError(String),
    /// The task did not run, or finished after the deadline.
    Cancelled,
}

impl<T> TaskResult<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, TaskResult::Value(_))
    }

    pub fn value(self) -> Option<T> {
        match self {
            TaskResult::Value(value) => Some(value),
            TaskResult::ExecutionError(_) | TaskResult::Cancelled => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_owned()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Scheduler {
    options: ScheduleOptions,
    deadline: Option<Instant>,
}

impl Scheduler {
    /// The deadline, if any, starts counting here.
    pub fn new(options: ScheduleOptions) -> Self {
        Scheduler {
            options,
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// No task starts after this instant, and tasks finishing after it count as cancelled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs `task` for every vertex of `deps`, which maps each vertex to the vertices it depends
    /// on. Every dependency must itself be a vertex and the graph must be acyclic.
    pub fn run<V, T, E, F>(&self, deps: &BTreeMap<V, BTreeSet<V>>, task: F) -> BTreeMap<V, TaskResult<T>>
    where
        V: Copy + Ord + Send + fmt::Debug,
        T: Send,
        E: fmt::Display,
        F: Fn(V) -> Result<T, E> + Sync,
    {
        let deadline = self.deadline;
        let expired = || deadline.map_or(false, |deadline| Instant::now() >= deadline);

        let mut dependants: BTreeMap<V, Vec<V>> = BTreeMap::new();
        let mut waiting: BTreeMap<V, usize> = BTreeMap::new();
        for (&vertex, vertex_deps) in deps {
            waiting.insert(vertex, vertex_deps.len());
            for dep in vertex_deps {
                if !deps.contains_key(dep) {
                    bug!("{:?} depends on {:?}, which is not scheduled", vertex, dep);
                }
                dependants.entry(*dep).or_default().push(vertex);
            }
        }

        let (ready_tx, ready_rx) = channel::unbounded::<V>();
        let (done_tx, done_rx) = channel::unbounded::<(V, TaskResult<T>)>();
        let mut results = BTreeMap::new();

        thread::scope(|scope| {
            for _ in 0..self.options.threads.max(1) {
                let ready_rx = ready_rx.clone();
                let done_tx = done_tx.clone();
                let task = &task;
                let expired = &expired;
                scope.spawn(move || {
                    for vertex in ready_rx.iter() {
                        let result = if expired() {
                            TaskResult::Cancelled
                        } else {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(vertex)));
                            if expired() {
                                TaskResult::Cancelled
                            } else {
                                match outcome {
                                    Ok(Ok(value)) => TaskResult::Value(value),
                                    Ok(Err(err)) => TaskResult::ExecutionError(err.to_string()),
                                    Err(payload) => {
                                        TaskResult::ExecutionError(panic_message(&*payload))
                                    }
                                }
                            }
                        };
                        if done_tx.send((vertex, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut running = 0;
            for (&vertex, &count) in &waiting {
                if count == 0 {
                    running += 1;
                    // Workers only stop once `ready_tx` is dropped below.
                    let _ = ready_tx.send(vertex);
                }
            }
            if running == 0 && !deps.is_empty() {
                bug!("dependency graph has no vertex without dependencies");
            }

            let mut failed_deps: BTreeSet<V> = BTreeSet::new();
            while running > 0 {
                let Ok(finished) = done_rx.recv() else {
                    bug!("all workers exited with {} tasks running", running);
                };
                running -= 1;

                let mut settled = vec![finished];
                while let Some((vertex, result)) = settled.pop() {
                    let succeeded = result.is_value();
                    tracing::trace!(?vertex, succeeded, "task finished");
                    results.insert(vertex, result);
                    for &dependant in dependants.get(&vertex).into_iter().flatten() {
                        if !succeeded {
                            failed_deps.insert(dependant);
                        }
                        let Some(count) = waiting.get_mut(&dependant) else {
                            continue;
                        };
                        *count -= 1;
                        if *count > 0 {
                            continue;
                        }
                        if failed_deps.contains(&dependant) {
                            settled.push((dependant, TaskResult::Cancelled));
                        } else {
                            running += 1;
                            let _ = ready_tx.send(dependant);
                        }
                    }
                }
            }
            drop(ready_tx);
        });

        if results.len() != deps.len() {
            bug!(
                "dependency graph has a cycle: {} of {} tasks never became ready",
                deps.len() - results.len(),
                deps.len()
            );
        }
        results
    }
}

/// Folds the successful results with `merge`. Returns `None` if no task produced a value.
pub fn merge_values<V, T>(
    results: impl IntoIterator<Item = (V, TaskResult<T>)>,
    merge: impl FnMut(T, T) -> T,
) -> Option<T> {
    results
        .into_iter()
        .filter_map(|(_, result)| result.value())
        .reduce(merge)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Exp};
    use rand_pcg::Pcg64Mcg;
    use std::sync::Mutex;
    use std::time::Duration;

    fn random_dag(gen: &mut Pcg64Mcg, size: usize, mean_edges: f64) -> BTreeMap<usize, BTreeSet<usize>> {
        let edges = Exp::new(1.0 / mean_edges).unwrap();
        (0..size)
            .map(|vertex| {
                let deps = if vertex == 0 {
                    BTreeSet::new()
                } else {
                    (0..edges.sample(gen) as usize)
                        .map(|_| gen.random_range(0..vertex))
                        .collect()
                };
                (vertex, deps)
            })
            .collect()
    }

    fn scheduler(threads: usize) -> Scheduler {
        Scheduler::new(ScheduleOptions {
            threads,
            timeout: None,
        })
    }

    #[test]
    fn test_random_dags_respect_dependencies() {
        // Seed generated once for deterministic tests
        let mut gen = Pcg64Mcg::seed_from_u64(0x5eed_a4b0_7c11_9e03);

        for &mean_edges in &[0.5, 2.0, 6.0] {
            for threads in [1, 3, 8] {
                let deps = random_dag(&mut gen, 30, mean_edges);
                let finished = Mutex::new(Vec::new());
                let results = scheduler(threads).run(&deps, |vertex| {
                    finished.lock().unwrap().push(vertex);
                    Ok::<_, String>(vertex * 2)
                });

                assert_eq!(results.len(), deps.len());
                for (vertex, result) in &results {
                    assert_eq!(result, &TaskResult::Value(vertex * 2));
                }
                let order = finished.into_inner().unwrap();
                let position: BTreeMap<_, _> =
                    order.iter().enumerate().map(|(i, &vertex)| (vertex, i)).collect();
                for (vertex, vertex_deps) in &deps {
                    for dep in vertex_deps {
                        assert!(position[dep] < position[vertex]);
                    }
                }
            }
        }
    }

    #[test]
    fn test_failure_cancels_dependants() {
        // 0 <- 1 <- 2, 0 <- 3, and 4 on its own
        let deps: BTreeMap<_, _> = [
            (0, BTreeSet::new()),
            (1, [0].into()),
            (2, [1].into()),
            (3, [0].into()),
            (4, BTreeSet::new()),
        ]
        .into_iter()
        .collect();
        let ran = Mutex::new(BTreeSet::new());
        let results = scheduler(2).run(&deps, |vertex| {
            ran.lock().unwrap().insert(vertex);
            match vertex {
                1 => Err("no luck".to_owned()),
                3 => panic!("broken task"),
                _ => Ok(()),
            }
        });

        assert_eq!(results[&0], TaskResult::Value(()));
        assert_eq!(results[&1], TaskResult::ExecutionError("no luck".to_owned()));
        assert_eq!(results[&2], TaskResult::Cancelled);
        assert_eq!(results[&3], TaskResult::ExecutionError("broken task".to_owned()));
        assert_eq!(results[&4], TaskResult::Value(()));
        assert!(!ran.into_inner().unwrap().contains(&2));
    }

    #[test]
    fn test_deadline_cancels_pending_tasks() {
        let deps: BTreeMap<_, _> = (0..6)
            .map(|vertex| {
                let deps = if vertex == 0 {
                    BTreeSet::new()
                } else {
                    [vertex - 1].into()
                };
                (vertex, deps)
            })
            .collect();
        let sched = Scheduler::new(ScheduleOptions {
            threads: 2,
            timeout: Some(Duration::from_millis(50)),
        });
        assert!(sched.deadline().is_some());
        assert!(scheduler(1).deadline().is_none());
        let results = sched.run(&deps, |vertex| {
            if vertex == 1 {
                thread::sleep(Duration::from_millis(200));
            }
            Ok::<_, String>(vertex)
        });

        assert_eq!(results[&0], TaskResult::Value(0));
        for vertex in 1..6 {
            assert_eq!(results[&vertex], TaskResult::Cancelled);
        }
    }

    #[test]
    fn test_merge_values_skips_failures() {
        let results = vec![
            (0, TaskResult::Value(1)),
            (1, TaskResult::ExecutionError("bad".to_owned())),
            (2, TaskResult::Value(5)),
            (3, TaskResult::Cancelled),
        ];
        assert_eq!(merge_values(results, |a, b| a + b), Some(6));
        assert_eq!(
            merge_values(Vec::<(usize, TaskResult<u32>)>::new(), |a, b| a + b),
            None
        );
    }

    #[test]
    fn test_empty_graph() {
        let results = scheduler(4).run(&BTreeMap::<usize, BTreeSet<usize>>::new(), |_| {
            Ok::<_, String>(())
        });
        assert!(results.is_empty());
    }
}
