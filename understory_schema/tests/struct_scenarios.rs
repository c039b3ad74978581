// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end struct scenarios: field sets, equality, copies, defaults and
//! codec-style access.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use understory_schema::{
    Field, FieldSet, MutField, PartialStruct, Schema, SchemaBuilder, Struct, StructError, Value,
};

struct Doc {
    schema: Arc<Schema>,
    title: Field<String>,
    pages: MutField<i32>,
    matrix: Field<Vec<Vec<i64>>>,
    ratio: MutField<Option<f64>>,
    blob: Field<Box<[u8]>>,
}

static DOC: LazyLock<Doc> = LazyLock::new(|| {
    let mut b = SchemaBuilder::new("Doc");
    let title = b.immutable("title");
    let pages = b.mutable_with_default("pages", 1);
    let matrix = b.immutable_with_default("matrix", Vec::new());
    let ratio = b.mutable_with_default("ratio", None);
    let blob = b.immutable_with_default("blob", Box::from([]));
    Doc {
        schema: b.finish(),
        title,
        pages,
        matrix,
        ratio,
        blob,
    }
});

#[test]
fn field_set_arithmetic() {
    let d = &*DOC;
    let (a, b, c) = (d.title, d.pages, d.matrix);
    assert_eq!((a + b + c).len(), 3);
    assert_eq!((a + b + c) - b, a + c);
    let expected = vec![0, 1, 2];
    for set in [a + b + c, c + b + a, b + a + c, (c + a) + b] {
        assert_eq!(set.iter().collect::<Vec<_>>(), expected);
    }
}

#[test]
fn equality_and_hash_over_nested_collections() {
    let d = &*DOC;
    let make = |rows: Vec<Vec<i64>>| {
        d.schema
            .build(|b| {
                b.set(d.title, "t".into()).set(d.matrix, rows);
            })
            .unwrap()
    };
    let a = make(vec![vec![1, 2], vec![3]]);
    let b = make(vec![vec![1, 2], vec![3]]);
    let c = make(vec![vec![1], vec![2, 3]]);
    assert_eq!(a, b);
    assert_ne!(a, c);

    let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert!(set.contains(&a));
}

#[test]
fn copy_leaves_original_untouched() {
    let d = &*DOC;
    let original = d
        .schema
        .build(|b| {
            b.set(d.title, "draft".into()).set(d.ratio, Some(0.5));
        })
        .unwrap();
    let edited = original.copy(|b| {
        b.set(d.pages, 12).set(d.ratio, None);
    });

    assert_eq!(original.get(d.pages), 1);
    assert_eq!(original.get(d.ratio), Some(0.5));
    assert_eq!(edited.get(d.pages), 12);
    assert_eq!(edited.get(d.ratio), None);
    assert_eq!(edited.get(d.title), "draft");
    assert_ne!(original, edited);
}

#[test]
fn defaults_and_missing_fields() {
    let d = &*DOC;
    let doc = d
        .schema
        .build(|b| {
            b.set(d.title, "only title".into());
        })
        .unwrap();
    assert_eq!(doc.get(d.pages), 1);
    assert_eq!(doc.get(d.matrix), Vec::<Vec<i64>>::new());
    assert_eq!(doc.get(d.ratio), None);
    assert!(doc.get(d.blob).is_empty());

    let err = d
        .schema
        .build(|b| {
            b.set(d.pages, 3);
        })
        .unwrap_err();
    assert_eq!(
        err,
        StructError::MissingField {
            schema: "Doc".into(),
            field: "title".into()
        }
    );
}

#[test]
fn codec_style_round_trip() {
    let d = &*DOC;
    let doc = d
        .schema
        .build(|b| {
            b.set(d.title, "codec".into())
                .set(d.matrix, vec![vec![7]])
                .set(d.blob, Box::from([1_u8, 2]));
        })
        .unwrap();

    let mut encoded = Vec::new();
    d.schema.for_each(doc.fields(), |def| {
        encoded.push((def.name().to_owned(), doc.value_of(def).unwrap()));
    });
    assert_eq!(encoded[2].1, Value::List(vec![Value::List(vec![Value::I64(7)])]));

    let mut builder = d.schema.builder();
    for (name, value) in encoded {
        builder.set_value(&name, value).unwrap();
    }
    assert_eq!(builder.build().unwrap(), doc);
}

#[test]
fn partial_views() {
    let d = &*DOC;
    let doc = d
        .schema
        .build(|b| {
            b.set(d.title, "p".into()).set(d.pages, 4);
        })
        .unwrap();
    let view = doc.take(d.pages + d.ratio);
    assert_eq!(view.fields(), d.pages + d.ratio);
    assert_eq!(view.try_get(d.pages), Ok(4));
    assert!(matches!(
        view.try_get(d.title),
        Err(StructError::FieldAbsent { .. })
    ));
    assert_eq!(d.schema.single(view.fields() - d.ratio).map(|f| f.name()), Some("pages"));
    assert_eq!(view.take(FieldSet::of(d.title)).fields(), FieldSet::EMPTY);
}

#[cfg(feature = "reactive")]
#[test]
fn observable_struct_tracks_writes() {
    use std::sync::Mutex;
    use understory_reactive::SyncProperty;
    use understory_schema::ObservableStruct;

    let d = &*DOC;
    let doc = d
        .schema
        .build(|b| {
            b.set(d.title, "live".into());
        })
        .unwrap();
    let live = Arc::new(ObservableStruct::new(&doc));
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    live.prop(d.pages)
        .add_change_listener(move |old: &i32, new: &i32| sink.lock().unwrap().push((*old, *new)));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let live = live.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    live.prop(d.pages).update(|p| p + 1);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(live.get(d.pages), 201);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 200);
    assert!(log.windows(2).all(|w| w[0].1 == w[1].0));
    assert_eq!(doc.get(d.pages), 1);
    assert_eq!(live.snapshot(), doc.copy(|b| { b.set(d.pages, 201); }));
}
