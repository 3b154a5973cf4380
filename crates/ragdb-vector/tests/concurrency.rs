use std::sync::Arc;
use std::thread;

use ragdb_core::Record;
use ragdb_vector::{CorpusPaths, IndexedCorpus};
use tempfile::TempDir;

/// Vector `i` is `[i, 1]`, so querying with `[1, 0]` scores it exactly `i`.
/// Any hit whose record text disagrees with its score means a reader saw the
/// index and the metadata out of step.
#[test]
fn readers_never_observe_a_half_applied_add() {
    let tmp = TempDir::new().unwrap();
    let corpus = Arc::new(IndexedCorpus::open(CorpusPaths::in_dir(tmp.path())).unwrap());

    let writer = {
        let corpus = Arc::clone(&corpus);
        thread::spawn(move || {
            for batch in 0..50usize {
                let ids: Vec<usize> = (batch * 4..batch * 4 + 4).collect();
                let vectors = ids.iter().map(|&i| vec![i as f32, 1.0]).collect();
                let records = ids.iter().map(|&i| Record::new(i.to_string())).collect();
                if batch % 10 == 9 {
                    corpus.add_and_persist(vectors, records).unwrap();
                } else {
                    corpus.add(vectors, records).unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let corpus = Arc::clone(&corpus);
            thread::spawn(move || {
                for _ in 0..200 {
                    let len = corpus.len();
                    assert_eq!(len % 4, 0, "adds are all-or-nothing");
                    for hit in corpus.search(&[1.0, 0.0], 8).unwrap() {
                        let id: f32 = hit.record.text.parse().unwrap();
                        assert_eq!(hit.score, id);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(corpus.len(), 200);
}
