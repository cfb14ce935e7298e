//! Selector evaluation over discovered resources
//!
//! Filters are a conjunction: each entry narrows the result of the previous
//! one. Tag filters narrow `vtags` and only drop a resource once no tag is
//! left, so a repository survives as long as one of its tags is selected.

pub mod pattern;

use crate::error::Result;
use crate::model::{Filter, FilterType, Resource};
use pattern::Pattern;

/// Apply every filter, in order, to the resources
pub fn filter_resources(resources: Vec<Resource>, filters: &[Filter]) -> Result<Vec<Resource>> {
    let mut resources = resources;
    for filter in filters {
        resources = apply(resources, filter)?;
    }
    Ok(resources)
}

/// Resources a single filter retains
pub fn apply(resources: Vec<Resource>, filter: &Filter) -> Result<Vec<Resource>> {
    filter.validate()?;
    let filtered = match filter.filter_type {
        FilterType::Resource => {
            let resource_type = filter.resource_type()?;
            resources
                .into_iter()
                .filter(|r| r.resource_type == resource_type)
                .collect()
        }
        FilterType::Name => {
            let pattern = text_pattern(filter)?;
            resources
                .into_iter()
                .filter(|r| pattern.matches(r.repository_name()))
                .collect()
        }
        FilterType::Tag => {
            let pattern = text_pattern(filter)?;
            resources
                .into_iter()
                .filter_map(|mut r| {
                    r.metadata.vtags.retain(|tag| pattern.matches(tag));
                    (!r.metadata.vtags.is_empty()).then_some(r)
                })
                .collect()
        }
        FilterType::Label => {
            let wanted = filter.value.as_list();
            resources
                .into_iter()
                .filter(|r| wanted.iter().all(|label| r.metadata.labels.iter().any(|l| l == label)))
                .collect()
        }
    };
    Ok(filtered)
}

/// Filters of the given kinds, in policy order
pub fn filters_of(filters: &[Filter], kinds: &[FilterType]) -> Vec<Filter> {
    filters
        .iter()
        .filter(|f| kinds.contains(&f.filter_type))
        .cloned()
        .collect()
}

fn text_pattern(filter: &Filter) -> Result<Pattern> {
    // validate() has already rejected list values for name and tag filters
    Pattern::new(filter.value.as_text().unwrap_or_default())
}
