//! Criteria matching between postings and subscriber criteria.
//!
//! Matching is conjunctive: every non-empty criterion must hold. Empty or
//! unset criteria impose no constraint. A posting that lacks the attribute a
//! criterion constrains does not satisfy that criterion. Nothing in here can
//! fail or perform I/O.

use tracing::debug;

use crate::board_store::{JobPosting, SubscriptionCriteria};

/// Returns true if `posting` satisfies every non-empty field of `criteria`.
pub fn matches(posting: &JobPosting, criteria: &SubscriptionCriteria) -> bool {
    matches_categories(posting.category.as_deref(), &criteria.categories)
        && matches_exact(posting.job_type.as_deref(), criteria.job_type.as_deref())
        && matches_substring(posting.location.as_deref(), criteria.location.as_deref())
        && matches_keywords(posting, criteria.keywords.as_deref())
        && matches_salary(posting.salary, criteria.salary_min, criteria.salary_max)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn matches_categories(category: Option<&str>, wanted: &[String]) -> bool {
    let mut wanted = wanted.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).peekable();
    if wanted.peek().is_none() {
        return true;
    }
    let Some(category) = non_blank(category).map(str::to_lowercase) else {
        return false;
    };
    wanted.any(|c| c.to_lowercase() == category)
}

fn matches_exact(actual: Option<&str>, wanted: Option<&str>) -> bool {
    let Some(wanted) = non_blank(wanted) else {
        return true;
    };
    match non_blank(actual) {
        Some(actual) => actual.to_lowercase() == wanted.to_lowercase(),
        None => false,
    }
}

fn matches_substring(actual: Option<&str>, wanted: Option<&str>) -> bool {
    let Some(wanted) = non_blank(wanted) else {
        return true;
    };
    match actual {
        Some(actual) => actual.to_lowercase().contains(&wanted.to_lowercase()),
        None => false,
    }
}

fn matches_keywords(posting: &JobPosting, keywords: Option<&str>) -> bool {
    let Some(keywords) = non_blank(keywords) else {
        return true;
    };
    let title = posting.title.to_lowercase();
    let description = posting.description.to_lowercase();
    keywords.split_whitespace().all(|keyword| {
        let keyword = keyword.to_lowercase();
        title.contains(&keyword) || description.contains(&keyword)
    })
}

fn matches_salary(salary: Option<u64>, min: Option<u64>, max: Option<u64>) -> bool {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            debug!("Salary range {}..={} is inverted, treating as no match", min, max);
            return false;
        }
    }
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(salary) = salary else {
        return false;
    };
    min.map_or(true, |min| salary >= min) && max.map_or(true, |max| salary <= max)
}
