use core::{fmt, ptr::NonNull};

use crate::{AvlTree, Dir, Links, TreeNode};

impl<T> AvlTree<T>
where
    T: TreeNode<Links<T>>,
    T::Key: fmt::Display,
{
    /// Renders the tree as a Graphviz `dot` graph.
    ///
    /// Nodes are labeled with their key and cached height; absent children
    /// are drawn as points.
    pub fn dotgraph<W>(&self, name: &str, mut w: W) -> fmt::Result
    where
        W: fmt::Write,
    {
        writeln!(w, "digraph \"graph-{name}\" {{")?;

        if let Some(root) = self.root {
            let mut missing = 0;
            unsafe { self.dotgraph_at(root, &mut missing, &mut w)? };
        }

        write!(w, "}}")
    }

    unsafe fn dotgraph_at<W>(&self, node: NonNull<T>, missing: &mut u32, w: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        unsafe {
            let key = node.as_ref().key();
            let height = T::links(node).as_ref().height();

            writeln!(w, "  \"{key}\" [label=\"{key} (h={height})\"];")?;

            for dir in [Dir::Left, Dir::Right] {
                match T::links(node).as_ref().child(dir) {
                    Some(child) => {
                        writeln!(w, "  \"{key}\" -> \"{}\";", child.as_ref().key())?;
                        self.dotgraph_at(child, missing, w)?;
                    }

                    None => {
                        writeln!(w, "  \"missing{missing}\" [shape=point];")?;
                        writeln!(w, "  \"{key}\" -> \"missing{missing}\";")?;
                        *missing += 1;
                    }
                }
            }
        }

        Ok(())
    }
}
