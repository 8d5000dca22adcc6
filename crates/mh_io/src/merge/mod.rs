// crates/mh_io/src/merge/mod.rs

//! 分布式合并
//!
//! - [`geometry`]: 几何合并（坐标、连接、体积、边界标记）
//! - [`solution`]: 解合并（守恒变量 + 派生诊断量）
//! - [`diagnostics`]: 本地派生诊断量计算
//!
//! # 一致性约定
//!
//! 所有 rank 必须以相同顺序进入合并。任何 rank 上的本地错误都先经集合操作
//! 交换，聚合者上的判定再广播出去，保证所有 rank 得到同一结论，
//! 不会出现部分 rank 已退出而其余 rank 阻塞在下一次集合操作的情况。

pub mod diagnostics;
pub mod geometry;
pub mod solution;

pub use geometry::{GeometryMerger, GeometryPass, MergeOptions};
pub use solution::{LocalFields, SolutionMerger};

use mh_runtime::Communicator;

use crate::error::{IoError, IoResult};

/// 让所有 rank 对本地结果达成一致
///
/// 任一 rank 失败时，失败的 rank 返回自己的错误，其余 rank 返回
/// [`IoError::PeerFailed`]（指向最小的失败 rank）。
pub fn agree<C: Communicator, T>(comm: &C, local: IoResult<T>) -> IoResult<T> {
    let message = local.as_ref().err().map(ToString::to_string);
    let all = comm.all_gather(message)?;
    match local {
        Err(e) => Err(e),
        Ok(v) => match all.into_iter().enumerate().find_map(|(r, m)| m.map(|m| (r, m))) {
            Some((rank, message)) => Err(IoError::PeerFailed { rank, message }),
            None => Ok(v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_runtime::ThreadComm;

    #[test]
    fn test_agree_all_ok() {
        let results = ThreadComm::run(3, |comm| agree(&comm, Ok::<_, IoError>(comm.rank())).unwrap());
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn test_agree_one_fails() {
        let results = ThreadComm::run(3, |comm| {
            let local = if comm.rank() == 1 {
                Err(IoError::invalid_data("bad"))
            } else {
                Ok(())
            };
            agree(&comm, local)
        });
        assert!(matches!(results[0], Err(IoError::PeerFailed { rank: 1, .. })));
        assert!(matches!(results[1], Err(IoError::InvalidData { .. })));
        assert!(matches!(results[2], Err(IoError::PeerFailed { rank: 1, .. })));
    }
}
