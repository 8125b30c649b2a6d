use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., donor or batch)
/// # Returns
/// A hashmap: group name -> indexes of the elements (in order)
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut groups: HashMap<T, Vec<usize>> = HashMap::default();
    for (elem, k) in membership.iter().enumerate() {
        groups.entry(k.clone()).or_default().push(elem);
    }
    groups
}

/// Distinct values in order of first appearance
pub fn unique_in_order<T>(values: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = fnv::FnvHashSet::default();
    values
        .iter()
        .filter(|x| seen.insert((*x).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_order() {
        let groups = partition_by_membership(&["a", "b", "a", "c", "a"]);
        assert_eq!(groups[&"a"], vec![0, 2, 4]);
        assert_eq!(groups[&"c"], vec![3]);
        assert_eq!(unique_in_order(&["b", "a", "b", "c"]), vec!["b", "a", "c"]);
    }
}
