// crates/mh_runtime/src/comm.rs

//! 集合通信抽象
//!
//! 分布式输出装配中，每个分区对应一个 rank，所有 rank 以阻塞式集合操作
//! 锁步推进：`gather`、`all_gather`、`exclusive_prefix_sum`、`broadcast`。
//! rank 0 是唯一的聚合者。
//!
//! # 实现
//!
//! - [`SerialComm`]: 单进程（rank 0 / size 1），所有集合操作退化为恒等
//! - [`ThreadComm`]: 在同一进程内以线程模拟 N 个 rank，用于测试与 CLI 驱动
//!
//! # 约定
//!
//! 1. 所有 rank 必须以相同顺序调用相同的集合操作
//! 2. `gather` 按 rank 升序装配，只有根进程得到结果
//! 3. 集合操作没有超时，任意 rank 缺席会导致其余 rank 阻塞
//!
//! # 使用示例
//!
//! ```rust
//! use mh_runtime::comm::{Communicator, ThreadComm};
//!
//! let offsets = ThreadComm::run(3, |comm| {
//!     comm.exclusive_prefix_sum(10).unwrap()
//! });
//! assert_eq!(offsets, vec![0, 10, 20]);
//! ```

use std::any::Any;
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// 聚合者 rank
pub const ROOT: usize = 0;

// =============================================================================
// Communicator Trait
// =============================================================================

/// 集合通信 Trait
///
/// 方法为泛型，因此以 `C: Communicator` 形式静态分发使用。
pub trait Communicator: Send + Sync {
    /// 当前 rank
    fn rank(&self) -> usize;

    /// rank 总数
    fn size(&self) -> usize;

    /// 是否为聚合者
    #[inline]
    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// 同步屏障
    fn barrier(&self);

    /// 按 rank 升序收集到根进程；非根进程返回 `None`
    fn gather<T: Send + 'static>(&self, value: T) -> RuntimeResult<Option<Vec<T>>>;

    /// 按 rank 升序收集到所有进程
    fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> RuntimeResult<Vec<T>>;

    /// 将根进程的值广播给所有进程
    ///
    /// 非根进程传入的值被忽略；根进程传入 `None` 时所有 rank 都返回
    /// [`RuntimeError::MissingRootValue`]。
    fn broadcast<T: Clone + Send + 'static>(&self, value: Option<T>) -> RuntimeResult<T>;

    /// 排他前缀和：rank r 得到 rank 0..r 的值之和
    fn exclusive_prefix_sum(&self, value: u64) -> RuntimeResult<u64> {
        let all = self.all_gather(value)?;
        Ok(all[..self.rank()].iter().sum())
    }
}

// =============================================================================
// SerialComm
// =============================================================================

/// 单进程通信器
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl SerialComm {
    /// 创建单进程通信器
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn gather<T: Send + 'static>(&self, value: T) -> RuntimeResult<Option<Vec<T>>> {
        Ok(Some(vec![value]))
    }

    fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> RuntimeResult<Vec<T>> {
        Ok(vec![value])
    }

    fn broadcast<T: Clone + Send + 'static>(&self, value: Option<T>) -> RuntimeResult<T> {
        value.ok_or(RuntimeError::MissingRootValue)
    }

    fn exclusive_prefix_sum(&self, _value: u64) -> RuntimeResult<u64> {
        Ok(0)
    }
}

// =============================================================================
// ThreadComm
// =============================================================================

type Slot = Option<Box<dyn Any + Send>>;

/// 线程间共享的交换区
struct Exchange {
    slots: Mutex<Vec<Slot>>,
    barrier: Barrier,
}

/// 线程模拟的多 rank 通信器
///
/// 每个集合操作分两个屏障阶段：
/// 1. 各 rank 写入自己的槽位，第一次屏障后数据全部可见
/// 2. 读取方取走或克隆数据，第二次屏障后槽位可被下一次集合操作复用
pub struct ThreadComm {
    rank: usize,
    size: usize,
    exchange: Arc<Exchange>,
}

impl ThreadComm {
    /// 创建 `size` 个相互连接的通信器，按 rank 顺序返回
    pub fn create(size: usize) -> RuntimeResult<Vec<ThreadComm>> {
        if size == 0 {
            return Err(RuntimeError::InvalidSize { size });
        }
        let exchange = Arc::new(Exchange {
            slots: Mutex::new((0..size).map(|_| None).collect()),
            barrier: Barrier::new(size),
        });
        Ok((0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                exchange: Arc::clone(&exchange),
            })
            .collect())
    }

    /// 以 `size` 个线程运行 `f`，返回按 rank 排序的结果
    ///
    /// 任一 rank 线程 panic 时，该 panic 在所有线程结束后向调用方传播。
    /// `size == 0` 时不启动任何线程，返回空结果。
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let comms = match Self::create(size) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        debug!(size, "启动线程通信器");
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| s.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn put<T: Send + 'static>(&self, slot: usize, value: T) {
        self.exchange.slots.lock()[slot] = Some(Box::new(value));
    }

    fn wait(&self) {
        self.exchange.barrier.wait();
    }
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.wait();
    }

    fn gather<T: Send + 'static>(&self, value: T) -> RuntimeResult<Option<Vec<T>>> {
        self.put(self.rank, value);
        self.wait();

        let result = if self.is_root() {
            let taken: Vec<Slot> = {
                let mut slots = self.exchange.slots.lock();
                slots.iter_mut().map(Option::take).collect()
            };
            let mut out = Vec::with_capacity(self.size);
            let mut failure = None;
            for (rank, slot) in taken.into_iter().enumerate() {
                match slot.map(|b| b.downcast::<T>()) {
                    Some(Ok(v)) => out.push(*v),
                    Some(Err(_)) => {
                        failure.get_or_insert(RuntimeError::TypeMismatch {
                            collective: "gather",
                            rank,
                        });
                    }
                    None => {
                        failure.get_or_insert(RuntimeError::MissingContribution {
                            collective: "gather",
                            rank,
                        });
                    }
                }
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(Some(out)),
            }
        } else {
            Ok(None)
        };

        self.wait();
        result
    }

    fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> RuntimeResult<Vec<T>> {
        self.put(self.rank, value);
        self.wait();

        let result = {
            let slots = self.exchange.slots.lock();
            slots
                .iter()
                .enumerate()
                .map(|(rank, slot)| match slot {
                    Some(b) => b.downcast_ref::<T>().cloned().ok_or(RuntimeError::TypeMismatch {
                        collective: "all_gather",
                        rank,
                    }),
                    None => Err(RuntimeError::MissingContribution {
                        collective: "all_gather",
                        rank,
                    }),
                })
                .collect::<RuntimeResult<Vec<T>>>()
        };

        self.wait();
        // 本 rank 的槽位只由本 rank 写入，屏障之后清理不会与他人读取冲突
        self.exchange.slots.lock()[self.rank] = None;
        result
    }

    fn broadcast<T: Clone + Send + 'static>(&self, value: Option<T>) -> RuntimeResult<T> {
        if self.is_root() {
            self.put(ROOT, value);
        }
        self.wait();

        let result = {
            let slots = self.exchange.slots.lock();
            match &slots[ROOT] {
                Some(b) => match b.downcast_ref::<Option<T>>() {
                    Some(Some(v)) => Ok(v.clone()),
                    Some(None) => Err(RuntimeError::MissingRootValue),
                    None => Err(RuntimeError::TypeMismatch {
                        collective: "broadcast",
                        rank: ROOT,
                    }),
                },
                None => Err(RuntimeError::MissingContribution {
                    collective: "broadcast",
                    rank: ROOT,
                }),
            }
        };

        self.wait();
        if self.is_root() {
            self.exchange.slots.lock()[ROOT] = None;
        }
        result
    }
}
