use std::collections::{HashSet, VecDeque};

use log::{debug, error, info};

use super::{Depth, MultiFilesystem, Node, Storage};
use crate::collection::Collection;
use crate::pathutils::unstrip_path;

#[derive(Debug, Default)]
struct Tally {
    item_errors: usize,
    collection_errors: usize,
}

/// Walk every collection breadth-first, counting and logging problems.
pub(super) fn verify(storage: &MultiFilesystem) -> bool {
    let mut tally = Tally::default();
    let mut pending: VecDeque<String> = VecDeque::from([String::new()]);

    while let Some(sane_path) = pending.pop_front() {
        let path = unstrip_path(&sane_path, true);
        debug!("Verifying collection {sane_path:?}");

        let collection = match storage.discover(&path, Depth::Zero).map(|mut nodes| nodes.next()) {
            Ok(Some(Ok(Node::Collection(collection)))) => collection,
            Ok(Some(Ok(Node::Item(_)))) | Ok(None) => continue,
            Ok(Some(Err(e))) | Err(e) => {
                tally.collection_errors += 1;
                error!("Invalid collection {sane_path:?}: {e}");
                continue;
            }
        };

        let tag = match collection.tag() {
            Ok(tag) => tag,
            Err(e) => {
                tally.collection_errors += 1;
                error!("Invalid collection {sane_path:?}: {e}");
                continue;
            }
        };

        let item_errors_before = tally.item_errors;
        verify_items(&collection, &mut tally);
        if tally.item_errors == item_errors_before {
            if let Err(e) = collection.sync(None) {
                tally.collection_errors += 1;
                error!("Failed to compute sync token of {sane_path:?}: {e}");
            }
        }

        let mut has_child_collections = false;
        match storage.discover(&path, Depth::One) {
            Ok(nodes) => {
                for node in nodes.skip(1) {
                    match node {
                        Ok(Node::Collection(child)) => {
                            has_child_collections = true;
                            pending.push_back(child.path().to_string());
                        }
                        Ok(Node::Item(_)) => {}
                        // Item errors were already counted above.
                        Err(e) => debug!("Skipping node in {sane_path:?}: {e}"),
                    }
                }
            }
            Err(e) => {
                tally.collection_errors += 1;
                error!("Failed to list children of {sane_path:?}: {e}");
            }
        }

        if let Some(tag) = tag.filter(|_| has_child_collections) {
            tally.collection_errors += 1;
            error!("Invalid collection {sane_path:?}: {tag} collection must not have child collections");
        }
    }

    info!(
        "Verified storage: {} item errors, {} collection errors",
        tally.item_errors, tally.collection_errors
    );
    tally.item_errors == 0 && tally.collection_errors == 0
}

fn verify_items(collection: &Collection, tally: &mut Tally) {
    let hrefs = match collection.list() {
        Ok(hrefs) => hrefs,
        Err(e) => {
            tally.collection_errors += 1;
            error!("Failed to list items of {:?}: {e}", collection.path());
            return;
        }
    };

    let mut uids: HashSet<String> = HashSet::new();
    for href in hrefs {
        let item = match collection.get(&href) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(e) => {
                tally.item_errors += 1;
                error!("Invalid item {href:?} in {:?}: {e}", collection.path());
                continue;
            }
        };
        match item.uid() {
            Ok(Some(uid)) if !uids.insert(uid.to_string()) => {
                tally.item_errors += 1;
                error!(
                    "Invalid item {href:?} in {:?}: UID conflict {uid:?}",
                    collection.path()
                );
            }
            Ok(_) => debug!("Verified item {href:?} in {:?}", collection.path()),
            Err(e) => {
                tally.item_errors += 1;
                error!("Invalid item {href:?} in {:?}: {e}", collection.path());
            }
        }
    }
}
