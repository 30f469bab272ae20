use core::ops::Range;
use std::cmp::Ordering;
use crate::index_space::IndexSpace;




/**
 * A node in an augmented binary search tree, keyed on the axis-0 extent of
 * an index space (as a half-open range). Each node records the maximum
 * axis-0 upper bound found in its sub-tree, so that whole sub-trees lying
 * below a query can be skipped.
 */
struct Node<const D: usize, V> {
    key: Range<i64>,
    space: IndexSpace<D>,
    value: V,
    max: i64,
    l: Option<Box<Node<D, V>>>,
    r: Option<Box<Node<D, V>>>,
}




// ============================================================================
impl<const D: usize, V> Node<D, V> {




    /**
     * Create a balanced sub-tree from a sorted slice. If the slice is not
     * sorted, the resulting tree is invalid.
     */
    fn from_sorted_slice(slice: &mut [Option<(IndexSpace<D>, V)>]) -> Option<Box<Self>> {
        if slice.is_empty() {
            return None
        }
        let mid = slice.len() / 2;
        let l = Self::from_sorted_slice(&mut slice[..mid]);
        let r = Self::from_sorted_slice(&mut slice[mid + 1..]);
        let (space, value) = slice[mid].take()?;
        let key = axis_range(&space);
        let max = Self::local_max(key.end, &l, &r);
        Some(Box::new(Self { key, space, value, max, l, r }))
    }




    /**
     * Return the number of nodes contained in this sub-tree (including self).
     */
    fn len(&self) -> usize {
        self.l.as_ref().map_or(0, |l| l.len()) +
        self.r.as_ref().map_or(0, |r| r.len()) + 1
    }




    /**
     * Determine the maximum upper bound based on the given endpoint, and two
     * other maybe-nodes.
     */
    fn local_max(upper: i64, l: &Option<Box<Self>>, r: &Option<Box<Self>>) -> i64 {
        let lmax = l.as_ref().map_or(upper, |l| l.max);
        let rmax = r.as_ref().map_or(upper, |r| r.max);
        upper.max(lmax).max(rmax)
    }




    /**
     * Like a left-most path, except the path only descends left while the
     * given predicate is satisfied.
     */
    fn lmost_path_while<F: Fn(&Self) -> bool>(&self, predicate: &F) -> Vec<&Self> {
        let mut path = vec![self];

        while let Some(l) = path.last().and_then(|b| b.l.as_ref()) {
            if !predicate(l) {
                break
            }
            path.push(l)
        }
        path
    }




    /**
     * Panic unless every node stores the maximum endpoint of its sub-tree.
     * For testing.
     */
    #[cfg(test)]
    fn validate_max(&self) -> i64 {
        let mut max = self.key.end;
        if let Some(l) = &self.l {
            max = max.max(l.validate_max())
        }
        if let Some(r) = &self.r {
            max = max.max(r.validate_max())
        }
        assert_eq!(max, self.max, "stored maximum endpoint out of sync with subtree");
        max
    }
}




fn axis_range<const D: usize>(space: &IndexSpace<D>) -> Range<i64> {
    space.lower()[0]..space.upper()[0] + 1
}

fn compare_start<const D: usize>(a: &IndexSpace<D>, b: &IndexSpace<D>) -> Ordering {
    (a.lower()[0], a.upper()[0]).cmp(&(b.lower()[0], b.upper()[0]))
}




/**
 * A static spatial index over a collection of index spaces, answering "which
 * members intersect this region" without visiting every member. Empty
 * members are never returned and are not stored.
 */
pub struct BoxTree<const D: usize, V> {
    root: Option<Box<Node<D, V>>>,
}




// ============================================================================
impl<const D: usize, V> BoxTree<D, V> {


    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }


    pub fn len(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.len())
    }


    /**
     * Return an iterator over the members which intersect the given region,
     * in no particular order.
     */
    pub fn query<'a>(&'a self, region: &'a IndexSpace<D>) -> impl Iterator<Item = (&'a IndexSpace<D>, &'a V)> + 'a {
        let range = axis_range(region);
        let start = range.start;
        let end = range.end;

        let descend_l = move |a: &Node<D, V>| start < a.max;
        let descend_r = move |a: &Node<D, V>| end > a.key.start;
        let predicate = move |a: &Node<D, V>| a.space.intersects(region);

        let nodes = if region.is_empty() {
            Vec::new()
        } else {
            self.root.as_ref().map_or(Vec::new(), |root| root.lmost_path_while(&descend_l))
        };
        QueryIter { nodes, descend_l, descend_r, predicate }
    }
}

impl<const D: usize, V> core::iter::FromIterator<(IndexSpace<D>, V)> for BoxTree<D, V> {
    fn from_iter<I: IntoIterator<Item = (IndexSpace<D>, V)>>(iter: I) -> Self {
        let mut items: Vec<_> = iter
            .into_iter()
            .filter(|(space, _)| !space.is_empty())
            .collect();
        items.sort_by(|a, b| compare_start(&a.0, &b.0));
        let mut items: Vec<_> = items.into_iter().map(Some).collect();

        Self {
            root: Node::from_sorted_slice(&mut items[..]),
        }
    }
}




/**
 * By-reference iterator that traverses the subset of the tree which may
 * intersect a query region.
 */
struct QueryIter<'a, const D: usize, V, F, G, H> {
    nodes: Vec<&'a Node<D, V>>,
    descend_l: F,
    descend_r: G,
    predicate: H,
}

impl<'a, const D: usize, V, F, G, H> Iterator for QueryIter<'a, D, V, F, G, H>
where
    F: Fn(&Node<D, V>) -> bool,
    G: Fn(&Node<D, V>) -> bool,
    H: Fn(&Node<D, V>) -> bool,
{
    type Item = (&'a IndexSpace<D>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(a) = self.nodes.pop() {
            if let Some(b) = &a.r {
                if (self.descend_r)(a) {
                    self.nodes.extend(b.lmost_path_while(&self.descend_l))
                }
            }
            if (self.predicate)(a) {
                return Some((&a.space, &a.value))
            }
        }
        None
    }
}
