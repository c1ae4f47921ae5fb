//! 红黑树
//!
//! 节点存放在树自己的槽位数组中，通过稳定的 [`NodeId`] 访问，
//! 节点内保存 `(key, value)`。同一份负载可以同时挂在多棵树上，
//! 只需要在每棵树里各插入一个以不同属性为键的节点。
//!
//! 重复键：新节点总是插入到相等键的左侧，树不做去重。
//!
//! # 复杂度
//!
//! - 插入 / 删除 / 精确查找 / floor / ceiling: O(log n)
//! - [`RbTree::count`]: O(n) 递归遍历，只用于诊断

use alloc::vec::Vec;
use core::cmp::Ordering;

/// 节点句柄
///
/// 节点被删除前一直有效，其他节点的插入和删除不会改变它。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RbColor {
    Black,
    Red,
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    color: RbColor,
}

/// 红黑树
#[derive(Debug, Clone)]
pub struct RbTree<K, V> {
    nodes: Vec<Node<K, V>>,
    /// 已回收的槽位
    vacant: Vec<NodeId>,
    root: Option<NodeId>,
    len: usize,
}

impl<K, V> Default for RbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RbTree<K, V> {
    /// 单个节点占用的字节数，用于内存预算
    pub const NODE_SIZE: usize = core::mem::size_of::<Node<K, V>>();

    /// 创建空树
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// 节点数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// 清空整棵树
    pub fn clear(&mut self) {
        log::trace!("[TREE] clear {} nodes", self.len);
        self.nodes.clear();
        self.vacant.clear();
        self.root = None;
        self.len = 0;
    }

    // --- 辅助函数 ---

    #[inline]
    fn node(&self, id: NodeId) -> &Node<K, V> {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        &mut self.nodes[id.index()]
    }

    #[inline]
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[inline]
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    #[inline]
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    #[inline]
    fn color(&self, id: NodeId) -> RbColor {
        self.node(id).color
    }

    #[inline]
    fn set_color(&mut self, id: NodeId, color: RbColor) {
        self.node_mut(id).color = color;
    }

    #[inline]
    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|n| self.color(n) == RbColor::Red)
    }

    /// 用 `new` 替换 `old` 在父节点中的位置
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            Some(p) if self.left(p) == Some(old) => self.node_mut(p).left = new,
            Some(p) => self.node_mut(p).right = new,
            None => self.root = new,
        }
    }

    /// 键
    pub fn key(&self, id: NodeId) -> &K {
        &self.node(id).key
    }

    /// 值
    pub fn value(&self, id: NodeId) -> &V {
        &self.node(id).value
    }

    /// 值（可变）
    pub fn value_mut(&mut self, id: NodeId) -> &mut V {
        &mut self.node_mut(id).value
    }

    // --- 旋转操作 ---

    fn rotate_left(&mut self, elm: NodeId) {
        let Some(tmp) = self.right(elm) else {
            return;
        };

        let tmp_left = self.left(tmp);
        self.node_mut(elm).right = tmp_left;
        if let Some(l) = tmp_left {
            self.node_mut(l).parent = Some(elm);
        }

        let parent = self.parent(elm);
        self.node_mut(tmp).parent = parent;
        self.replace_child(parent, elm, Some(tmp));

        self.node_mut(tmp).left = Some(elm);
        self.node_mut(elm).parent = Some(tmp);
    }

    fn rotate_right(&mut self, elm: NodeId) {
        let Some(tmp) = self.left(elm) else {
            return;
        };

        let tmp_right = self.right(tmp);
        self.node_mut(elm).left = tmp_right;
        if let Some(r) = tmp_right {
            self.node_mut(r).parent = Some(elm);
        }

        let parent = self.parent(elm);
        self.node_mut(tmp).parent = parent;
        self.replace_child(parent, elm, Some(tmp));

        self.node_mut(tmp).right = Some(elm);
        self.node_mut(elm).parent = Some(tmp);
    }

    // --- 插入修复 ---

    fn insert_color(&mut self, mut elm: NodeId) {
        while let Some(mut parent) = self.parent(elm) {
            if self.color(parent) != RbColor::Red {
                break;
            }
            // 红色节点一定不是根
            let Some(gparent) = self.parent(parent) else {
                break;
            };

            if Some(parent) == self.left(gparent) {
                let uncle = self.right(gparent);
                if let Some(u) = uncle.filter(|&u| self.color(u) == RbColor::Red) {
                    self.set_color(u, RbColor::Black);
                    self.set_color(parent, RbColor::Black);
                    self.set_color(gparent, RbColor::Red);
                    elm = gparent;
                    continue;
                }
                if self.right(parent) == Some(elm) {
                    self.rotate_left(parent);
                    core::mem::swap(&mut parent, &mut elm);
                }
                self.set_color(parent, RbColor::Black);
                self.set_color(gparent, RbColor::Red);
                self.rotate_right(gparent);
            } else {
                let uncle = self.left(gparent);
                if let Some(u) = uncle.filter(|&u| self.color(u) == RbColor::Red) {
                    self.set_color(u, RbColor::Black);
                    self.set_color(parent, RbColor::Black);
                    self.set_color(gparent, RbColor::Red);
                    elm = gparent;
                    continue;
                }
                if self.left(parent) == Some(elm) {
                    self.rotate_right(parent);
                    core::mem::swap(&mut parent, &mut elm);
                }
                self.set_color(parent, RbColor::Black);
                self.set_color(gparent, RbColor::Red);
                self.rotate_left(gparent);
            }
        }
        if let Some(r) = self.root {
            self.set_color(r, RbColor::Black);
        }
    }

    // --- 删除 ---

    fn remove_color(&mut self, mut parent: Option<NodeId>, mut elm: Option<NodeId>) {
        while !self.is_red(elm) && elm != self.root {
            // elm 不是根，所以一定有父节点
            let Some(p) = parent else {
                break;
            };

            if self.left(p) == elm {
                let Some(mut sib) = self.right(p) else {
                    break;
                };
                if self.color(sib) == RbColor::Red {
                    self.set_color(sib, RbColor::Black);
                    self.set_color(p, RbColor::Red);
                    self.rotate_left(p);
                    match self.right(p) {
                        Some(s) => sib = s,
                        None => break,
                    }
                }

                let left_black = !self.is_red(self.left(sib));
                let right_black = !self.is_red(self.right(sib));

                if left_black && right_black {
                    self.set_color(sib, RbColor::Red);
                    elm = Some(p);
                    parent = self.parent(p);
                } else {
                    if right_black {
                        if let Some(l) = self.left(sib) {
                            self.set_color(l, RbColor::Black);
                        }
                        self.set_color(sib, RbColor::Red);
                        self.rotate_right(sib);
                        match self.right(p) {
                            Some(s) => sib = s,
                            None => break,
                        }
                    }
                    self.set_color(sib, self.color(p));
                    self.set_color(p, RbColor::Black);
                    if let Some(r) = self.right(sib) {
                        self.set_color(r, RbColor::Black);
                    }
                    self.rotate_left(p);
                    elm = self.root;
                    break;
                }
            } else {
                let Some(mut sib) = self.left(p) else {
                    break;
                };
                if self.color(sib) == RbColor::Red {
                    self.set_color(sib, RbColor::Black);
                    self.set_color(p, RbColor::Red);
                    self.rotate_right(p);
                    match self.left(p) {
                        Some(s) => sib = s,
                        None => break,
                    }
                }

                let left_black = !self.is_red(self.left(sib));
                let right_black = !self.is_red(self.right(sib));

                if left_black && right_black {
                    self.set_color(sib, RbColor::Red);
                    elm = Some(p);
                    parent = self.parent(p);
                } else {
                    if left_black {
                        if let Some(r) = self.right(sib) {
                            self.set_color(r, RbColor::Black);
                        }
                        self.set_color(sib, RbColor::Red);
                        self.rotate_left(sib);
                        match self.left(p) {
                            Some(s) => sib = s,
                            None => break,
                        }
                    }
                    self.set_color(sib, self.color(p));
                    self.set_color(p, RbColor::Black);
                    if let Some(l) = self.left(sib) {
                        self.set_color(l, RbColor::Black);
                    }
                    self.rotate_right(p);
                    elm = self.root;
                    break;
                }
            }
        }
        if let Some(e) = elm {
            self.set_color(e, RbColor::Black);
        }
    }

    /// 删除节点，返回其键值
    ///
    /// 有两个子节点时，用中序后继接替被删节点的结构位置（而不是交换负载），
    /// 因此其他节点的 [`NodeId`] 保持不变。
    pub fn remove(&mut self, elm: NodeId) -> (K, V)
    where
        K: Copy,
        V: Copy,
    {
        let child;
        let mut parent;
        let color;

        match (self.left(elm), self.right(elm)) {
            (Some(elm_left), Some(elm_right)) => {
                let mut successor = elm_right;
                while let Some(l) = self.left(successor) {
                    successor = l;
                }

                child = self.right(successor);
                parent = self.parent(successor);
                color = self.color(successor);

                // 1. 把后继从原位置摘下
                if let Some(c) = child {
                    self.node_mut(c).parent = parent;
                }
                self.replace_child(parent, successor, child);
                if parent == Some(elm) {
                    parent = Some(successor);
                }

                // 2. 后继接替 elm 的位置和颜色
                let elm_parent = self.parent(elm);
                let elm_color = self.color(elm);
                // elm 的右孩子可能刚刚被改成 child
                let elm_right = if elm_right == successor {
                    child
                } else {
                    self.right(elm)
                };
                {
                    let succ = self.node_mut(successor);
                    succ.parent = elm_parent;
                    succ.left = Some(elm_left);
                    succ.right = elm_right;
                    succ.color = elm_color;
                }
                self.replace_child(elm_parent, elm, Some(successor));
                self.node_mut(elm_left).parent = Some(successor);
                if let Some(r) = elm_right {
                    self.node_mut(r).parent = Some(successor);
                }
            }
            (left, right) => {
                child = left.or(right);
                parent = self.parent(elm);
                color = self.color(elm);

                if let Some(c) = child {
                    self.node_mut(c).parent = parent;
                }
                self.replace_child(parent, elm, child);
            }
        }

        if color == RbColor::Black {
            self.remove_color(parent, child);
        }

        self.release(elm)
    }

    fn release(&mut self, id: NodeId) -> (K, V)
    where
        K: Copy,
        V: Copy,
    {
        let node = self.node_mut(id);
        node.left = None;
        node.right = None;
        node.parent = None;
        let kv = (node.key, node.value);
        self.vacant.push(id);
        self.len -= 1;
        kv
    }

    // --- 遍历 ---

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.left(id) {
            id = l;
        }
        id
    }

    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.right(id) {
            id = r;
        }
        id
    }

    /// 最小键节点
    pub fn first(&self) -> Option<NodeId> {
        self.root.map(|r| self.leftmost(r))
    }

    /// 最大键节点
    pub fn last(&self) -> Option<NodeId> {
        self.root.map(|r| self.rightmost(r))
    }

    /// 中序后继
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.right(id) {
            return Some(self.leftmost(r));
        }
        let mut cur = id;
        let mut parent = self.parent(cur);
        while let Some(p) = parent {
            if self.left(p) == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.parent(p);
        }
        None
    }

    /// 中序前驱
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        if let Some(l) = self.left(id) {
            return Some(self.rightmost(l));
        }
        let mut cur = id;
        let mut parent = self.parent(cur);
        while let Some(p) = parent {
            if self.right(p) == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.parent(p);
        }
        None
    }

    /// 按键升序遍历
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tree: self,
            next: self.first(),
        }
    }

    /// 递归统计节点数
    ///
    /// 开销较大，只用于诊断；热路径请使用 [`RbTree::len`]。
    pub fn count(&self) -> usize {
        fn walk<K, V>(tree: &RbTree<K, V>, id: Option<NodeId>) -> usize {
            match id {
                Some(n) => 1 + walk(tree, tree.left(n)) + walk(tree, tree.right(n)),
                None => 0,
            }
        }
        walk(self, self.root)
    }
}

impl<K: Ord + Copy, V: Copy> RbTree<K, V> {
    fn alloc_node(&mut self, key: K, value: V, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            key,
            value,
            left: None,
            right: None,
            parent,
            color: RbColor::Red,
        };
        self.len += 1;
        match self.vacant.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(node);
                id
            }
        }
    }

    /// 插入节点，返回新节点句柄
    ///
    /// 不拒绝重复键：相等的键插入到已有节点的左侧。
    pub fn insert(&mut self, key: K, value: V) -> NodeId {
        let mut tmp = self.root;
        let mut parent = None;
        let mut go_left = false;

        while let Some(node) = tmp {
            parent = Some(node);
            go_left = key <= *self.key(node);
            tmp = if go_left {
                self.left(node)
            } else {
                self.right(node)
            };
        }

        let elm = self.alloc_node(key, value, parent);
        match parent {
            Some(p) if go_left => self.node_mut(p).left = Some(elm),
            Some(p) => self.node_mut(p).right = Some(elm),
            None => self.root = Some(elm),
        }

        self.insert_color(elm);
        elm
    }

    /// 修改节点的键，返回新句柄
    pub fn rekey(&mut self, id: NodeId, key: K) -> NodeId {
        let (_, value) = self.remove(id);
        self.insert(key, value)
    }

    // --- 查找 ---

    /// 精确查找
    pub fn find(&self, key: K) -> Option<NodeId> {
        let mut tmp = self.root;
        while let Some(node) = tmp {
            match key.cmp(self.key(node)) {
                Ordering::Less => tmp = self.left(node),
                Ordering::Greater => tmp = self.right(node),
                Ordering::Equal => return Some(node),
            }
        }
        None
    }

    /// 查找键 `<= key` 的最大节点
    pub fn floor(&self, key: K) -> Option<NodeId> {
        let mut tmp = self.root;
        let mut best = None;
        while let Some(node) = tmp {
            match key.cmp(self.key(node)) {
                Ordering::Less => tmp = self.left(node),
                Ordering::Greater => {
                    best = Some(node);
                    tmp = self.right(node);
                }
                Ordering::Equal => return Some(node),
            }
        }
        best
    }

    /// 查找键 `>= key` 的最小节点
    pub fn ceiling(&self, key: K) -> Option<NodeId> {
        let mut tmp = self.root;
        let mut best = None;
        while let Some(node) = tmp {
            match key.cmp(self.key(node)) {
                Ordering::Less => {
                    best = Some(node);
                    tmp = self.left(node);
                }
                Ordering::Greater => tmp = self.right(node),
                Ordering::Equal => return Some(node),
            }
        }
        best
    }
}

/// 中序迭代器
pub struct Iter<'a, K, V> {
    tree: &'a RbTree<K, V>,
    next: Option<NodeId>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (NodeId, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.next(id);
        let node = self.tree.node(id);
        Some((id, &node.key, &node.value))
    }
}
