//! 实例表
//!
//! 固定数量的逻辑解码实例共享同一个物理 VPU。每个槽位记录打开/关闭状态和硬件句柄，
//! 句柄只在实例打开时有意义。正常路径下只有 Worker 修改实例表，
//! 提交者只读取它做快速失败检查；强制恢复会绕过 Worker 直接关闭实例。

use parking_lot::RwLock;
use std::time::Instant;

use crate::command::{InstanceHandle, InstanceId};

/// 单个实例槽位
#[derive(Debug, Clone, Copy)]
struct Instance {
    closed: bool,
    handle: Option<InstanceHandle>,
    opened_at: Option<Instant>,
    commands: u64,
}

impl Instance {
    const CLOSED: Instance = Instance {
        closed: true,
        handle: None,
        opened_at: None,
        commands: 0,
    };
}

/// 实例状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSnapshot {
    /// 实例ID
    pub id: InstanceId,
    /// 是否关闭
    pub closed: bool,
    /// 打开时的硬件句柄
    pub handle: Option<InstanceHandle>,
    /// 打开以来处理的命令数
    pub commands: u64,
    /// 打开时间
    pub opened_at: Option<Instant>,
}

/// 实例表
#[derive(Debug)]
pub struct InstanceTable {
    slots: Vec<RwLock<Instance>>,
}

impl InstanceTable {
    /// 创建 `count` 个关闭状态的槽位
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| RwLock::new(Instance::CLOSED)).collect(),
        }
    }

    fn slot(&self, id: InstanceId) -> Option<&RwLock<Instance>> {
        self.slots.get(id as usize)
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// ID 是否在范围内
    pub fn contains(&self, id: InstanceId) -> bool {
        (id as usize) < self.slots.len()
    }

    /// 实例是否打开（越界视为关闭）
    pub fn is_open(&self, id: InstanceId) -> bool {
        self.slot(id).is_some_and(|slot| !slot.read().closed)
    }

    /// 打开实例的当前句柄
    pub fn handle(&self, id: InstanceId) -> Option<InstanceHandle> {
        self.slot(id).and_then(|slot| {
            let instance = slot.read();
            if instance.closed { None } else { instance.handle }
        })
    }

    /// 实例打开且句柄匹配
    pub fn validate(&self, id: InstanceId, handle: Option<InstanceHandle>) -> bool {
        match (self.handle(id), handle) {
            (Some(current), Some(handle)) => current == handle,
            _ => false,
        }
    }

    /// 标记实例打开
    pub fn mark_open(&self, id: InstanceId, handle: InstanceHandle) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        *slot.write() = Instance {
            closed: false,
            handle: Some(handle),
            opened_at: Some(Instant::now()),
            commands: 0,
        };
        true
    }

    /// 标记实例关闭并清除句柄，返回关闭前的句柄（原本已关闭返回 None）
    pub fn mark_closed(&self, id: InstanceId) -> Option<InstanceHandle> {
        let slot = self.slot(id)?;
        let mut instance = slot.write();
        let previous = if instance.closed { None } else { instance.handle };
        *instance = Instance::CLOSED;
        previous
    }

    /// 记录一次命令处理
    pub fn record_command(&self, id: InstanceId) {
        if let Some(slot) = self.slot(id) {
            let mut instance = slot.write();
            if !instance.closed {
                instance.commands += 1;
            }
        }
    }

    /// 获取实例快照
    pub fn snapshot(&self, id: InstanceId) -> Option<InstanceSnapshot> {
        self.slot(id).map(|slot| {
            let instance = slot.read();
            InstanceSnapshot {
                id,
                closed: instance.closed,
                handle: if instance.closed { None } else { instance.handle },
                commands: instance.commands,
                opened_at: instance.opened_at,
            }
        })
    }

    /// 所有打开的实例及其句柄
    pub fn open_instances(&self) -> Vec<(InstanceId, InstanceHandle)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let instance = slot.read();
                match (instance.closed, instance.handle) {
                    (false, Some(handle)) => Some((id as InstanceId, handle)),
                    _ => None,
                }
            })
            .collect()
    }

    /// 打开的实例数量
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.read().closed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> InstanceHandle {
        InstanceHandle::new(raw).unwrap()
    }

    #[test]
    fn test_initially_closed() {
        let table = InstanceTable::new(5);
        assert_eq!(table.len(), 5);
        assert_eq!(table.open_count(), 0);
        for id in 0..5 {
            let snapshot = table.snapshot(id).unwrap();
            assert!(snapshot.closed);
            assert_eq!(snapshot.handle, None);
        }
        assert!(table.snapshot(5).is_none());
    }

    #[test]
    fn test_open_and_close() {
        let table = InstanceTable::new(5);
        assert!(table.mark_open(1, handle(0x10)));
        assert!(table.is_open(1));
        assert_eq!(table.handle(1), Some(handle(0x10)));
        assert_eq!(table.open_instances(), vec![(1, handle(0x10))]);

        assert_eq!(table.mark_closed(1), Some(handle(0x10)));
        assert!(!table.is_open(1));
        assert_eq!(table.handle(1), None);
        // 重复关闭
        assert_eq!(table.mark_closed(1), None);
    }

    #[test]
    fn test_validate_handle() {
        let table = InstanceTable::new(2);
        table.mark_open(0, handle(7));

        assert!(table.validate(0, Some(handle(7))));
        assert!(!table.validate(0, Some(handle(8))));
        assert!(!table.validate(0, None));
        assert!(!table.validate(1, Some(handle(7))));
        assert!(!table.validate(9, Some(handle(7))));
    }

    #[test]
    fn test_out_of_range() {
        let table = InstanceTable::new(2);
        assert!(!table.contains(2));
        assert!(!table.mark_open(2, handle(1)));
        assert_eq!(table.mark_closed(2), None);
        assert!(!table.is_open(2));
    }

    #[test]
    fn test_command_counter_resets_on_reopen() {
        let table = InstanceTable::new(1);
        table.mark_open(0, handle(1));
        table.record_command(0);
        table.record_command(0);
        assert_eq!(table.snapshot(0).unwrap().commands, 2);

        table.mark_closed(0);
        table.record_command(0);
        table.mark_open(0, handle(2));
        assert_eq!(table.snapshot(0).unwrap().commands, 0);
    }
}
