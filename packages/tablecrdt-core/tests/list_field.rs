use tablecrdt_core::fields::{ListField, ListPatch, ListSplice, SequenceMetadata};
use tablecrdt_core::{Error, Field, Stamp};

struct Site {
    field: ListField<i32>,
    value: Vec<i32>,
    meta: SequenceMetadata,
    store_id: u32,
}

impl Site {
    fn new(store_id: u32) -> Self {
        let field = ListField::new();
        Self {
            value: field.create_value(),
            meta: field.create_metadata(),
            field,
            store_id,
        }
    }

    fn local(&mut self, version: u64, splices: Vec<ListSplice<i32>>) -> ListPatch<i32> {
        let out = self
            .field
            .apply_update(&self.value, splices, &mut self.meta, Stamp::new(version, self.store_id))
            .unwrap();
        self.value = out.value;
        out.patch
    }

    fn remote(&mut self, version: u64, store_id: u32, patch: &ListPatch<i32>) {
        let out = self
            .field
            .apply_patch(&self.value, patch, &mut self.meta, Stamp::new(version, store_id))
            .unwrap();
        self.value = out.value;
    }
}

#[test]
fn merged_patch_replays_like_its_parts() {
    let mut origin = Site::new(1);
    let first = origin.local(1, vec![ListSplice::insert(0, vec![1, 2, 3])]);
    let second = origin.local(2, vec![ListSplice::new(1, 1, vec![4, 5])]);
    let merged = origin.field.merge_patch(first.clone(), second.clone());

    let mut stepwise = Site::new(2);
    stepwise.remote(1, 1, &first);
    stepwise.remote(2, 1, &second);

    let mut at_once = Site::new(3);
    at_once.remote(2, 1, &merged);

    assert_eq!(stepwise.value, vec![1, 4, 5, 3]);
    assert_eq!(at_once.value, stepwise.value);
    assert_eq!(at_once.meta.ids(), stepwise.meta.ids());
}

#[test]
fn concurrent_inserts_at_the_same_index_converge() {
    let mut a = Site::new(1);
    let mut b = Site::new(2);
    let base = a.local(1, vec![ListSplice::insert(0, vec![0, 9])]);
    b.remote(1, 1, &base);

    let from_a = a.local(2, vec![ListSplice::insert(1, vec![1, 1])]);
    let from_b = b.local(2, vec![ListSplice::insert(1, vec![2, 2])]);
    a.remote(2, 2, &from_b);
    b.remote(2, 1, &from_a);

    assert_eq!(a.value, b.value);
    assert_eq!(a.value.len(), 6);
    assert_eq!(a.value.first(), Some(&0));
    assert_eq!(a.value.last(), Some(&9));
}

#[test]
fn removed_elements_stay_buried() {
    let mut a = Site::new(1);
    let mut b = Site::new(2);
    let insert = a.local(1, vec![ListSplice::insert(0, vec![7, 8])]);
    let remove = a.local(2, vec![ListSplice::remove(0, 1)]);

    b.remote(2, 1, &remove);
    b.remote(1, 1, &insert);
    b.remote(1, 1, &insert);
    assert_eq!(b.value, vec![8]);
    assert_eq!(b.meta.cemetery().len(), 1);
    assert!(b.meta.is_buried(&insert[0].inserted_ids[0]));
    assert_eq!(a.value, b.value);
}

#[test]
fn removal_ranges_are_clamped() {
    let mut site = Site::new(1);
    site.local(1, vec![ListSplice::insert(0, vec![1, 2, 3, 4])]);
    let patch = site.local(2, vec![ListSplice::remove(2, 10)]);
    assert_eq!(site.value, vec![1, 2]);
    assert_eq!(patch[0].removed_values, vec![3, 4]);

    let patch = site.local(3, vec![ListSplice::remove(-9, 1)]);
    assert_eq!(site.value, vec![2]);
    assert_eq!(patch[0].removed_values, vec![1]);
}

#[test]
fn patches_with_mismatched_lengths_are_rejected() {
    let mut origin = Site::new(1);
    let mut patch = origin.local(1, vec![ListSplice::insert(0, vec![1, 2])]);
    patch[0].inserted_values.pop();

    let mut site = Site::new(2);
    let err = site
        .field
        .apply_patch(&site.value, &patch, &mut site.meta, Stamp::new(1, 1))
        .unwrap_err();
    assert!(matches!(err, Error::MalformedPatch(_)));
    assert!(site.meta.ids().is_empty());
}

#[test]
fn invert_restores_removed_values_in_place() {
    let mut site = Site::new(1);
    site.local(1, vec![ListSplice::insert(0, vec![1, 2, 3, 4])]);
    let patch = site.local(2, vec![ListSplice::remove(1, 2)]);
    let undo = site.field.invert(&site.meta, &Vec::new(), &patch);
    site.local(3, undo);
    assert_eq!(site.value, vec![1, 2, 3, 4]);
}
