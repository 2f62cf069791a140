use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{LoggedModel, MergedModel, ModelVersionInfo, RegisteredModelVersion};
use crate::uri::normalize;

/// Field-wise merge where populated fields of `later` win.
pub trait FieldMerge {
    #[must_use]
    fn merge_from(self, later: Self) -> Self;
}

impl FieldMerge for MergedModel {
    fn merge_from(self, later: Self) -> Self {
        Self {
            artifact_path: later.artifact_path.or(self.artifact_path),
            flavors: later.flavors.or(self.flavors),
            utc_time_created: later.utc_time_created.or(self.utc_time_created),
            registered_model_name: later.registered_model_name.or(self.registered_model_name),
            registered_model_version: later
                .registered_model_version
                .or(self.registered_model_version),
            registered_model_creation_timestamp: later
                .registered_model_creation_timestamp
                .or(self.registered_model_creation_timestamp),
            model_uri: later.model_uri.or(self.model_uri),
        }
    }
}

/// Concatenate `items` with `to_concat`, then fold entries sharing a key into
/// one value, later entries winning on conflicting fields.
///
/// Groups come out in order of first appearance. Entries whose key is `None`
/// never join a group and are returned unmerged.
pub fn concat_and_group_by_key<T, K, F>(items: Vec<T>, to_concat: Vec<T>, key: F) -> Vec<T>
where
    T: FieldMerge,
    K: Ord,
    F: Fn(&T) -> Option<K>,
{
    let mut slots: Vec<Option<T>> = Vec::new();
    let mut slot_by_key: BTreeMap<K, usize> = BTreeMap::new();

    for item in items.into_iter().chain(to_concat) {
        let Some(group_key) = key(&item) else {
            slots.push(Some(item));
            continue;
        };
        match slot_by_key.get(&group_key) {
            Some(&index) => {
                let merged = match slots[index].take() {
                    Some(existing) => existing.merge_from(item),
                    None => item,
                };
                slots[index] = Some(merged);
            }
            None => {
                slot_by_key.insert(group_key, slots.len());
                slots.push(Some(item));
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Join logged models and registry versions on their normalized artifact path
/// and order the result for display.
///
/// Rows that are both logged and registered come first, then registered-only,
/// then logged-only; see [`rank_models`] for the full ordering.
#[must_use]
pub fn merge_logged_and_registered_models(
    logged_models: &[LoggedModel],
    registered_models: &[ModelVersionInfo],
) -> Vec<MergedModel> {
    let logged = logged_models
        .iter()
        .map(|model| {
            MergedModel::from(LoggedModel {
                artifact_path: normalize(&model.artifact_path),
                ..model.clone()
            })
        })
        .collect();
    let registered = registered_models
        .iter()
        .map(|info| MergedModel::from(RegisteredModelVersion::from(info)))
        .collect();

    let mut models =
        concat_and_group_by_key(logged, registered, |model: &MergedModel| model.artifact_path.clone());
    models.sort_by(rank_models);
    models
}

/// Display order of merged model rows.
///
/// 1. registered rows before unregistered rows;
/// 2. among registered rows, rows with flavors first, then newer registry versions;
/// 3. newer logged creation time;
/// 4. artifact path, registered name and version as final tie-breakers.
#[must_use]
pub fn rank_models(lhs: &MergedModel, rhs: &MergedModel) -> Ordering {
    rhs.is_registered()
        .cmp(&lhs.is_registered())
        .then_with(|| {
            if lhs.is_registered() && rhs.is_registered() {
                rhs.has_flavors().cmp(&lhs.has_flavors()).then_with(|| {
                    rhs.registered_model_creation_timestamp
                        .unwrap_or_default()
                        .cmp(&lhs.registered_model_creation_timestamp.unwrap_or_default())
                })
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| {
            rhs.utc_time_created
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&lhs.utc_time_created.unwrap_or(f64::NEG_INFINITY))
        })
        .then_with(|| lhs.artifact_path.cmp(&rhs.artifact_path))
        .then_with(|| lhs.registered_model_name.cmp(&rhs.registered_model_name))
        .then_with(|| version_number(lhs).cmp(&version_number(rhs)))
        .then_with(|| lhs.registered_model_version.cmp(&rhs.registered_model_version))
}

#[must_use]
pub fn model_rank_tie_breakers() -> Vec<String> {
    vec![
        "registered desc".to_string(),
        "has_flavors desc (registered only)".to_string(),
        "registered_model_creation_timestamp desc (registered only)".to_string(),
        "utc_time_created desc".to_string(),
        "artifact_path asc".to_string(),
        "registered_model_name asc".to_string(),
        "registered_model_version asc".to_string(),
    ]
}

fn version_number(model: &MergedModel) -> Option<i64> {
    model.registered_model_version.as_deref().and_then(|version| version.parse().ok())
}
