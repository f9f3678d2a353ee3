use super::condition::Condition;
use super::eval::{evaluate, Fields};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Option<Condition>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new(filter: Option<Condition>) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub fn filter_entities<'a, E: Fields>(entities: &'a [E], filter: Option<&Condition>) -> Vec<&'a E> {
    entities.iter().filter(|e| evaluate(*e, filter)).collect()
}

pub fn find_first<'a, E: Fields>(entities: &'a [E], filter: Option<&Condition>) -> Option<&'a E> {
    entities.iter().find(|e| evaluate(*e, filter))
}

/// With no filter: whether `entities` is non-empty.
pub fn match_exists<E: Fields>(entities: &[E], filter: Option<&Condition>) -> bool {
    find_first(entities, filter).is_some()
}

pub fn count_where<E: Fields>(entities: &[E], filter: Option<&Condition>) -> usize {
    entities.iter().filter(|e| evaluate(*e, filter)).count()
}

/// Paged filter; stops scanning once `limit` matches past `offset` are collected.
pub fn find_where<'a, E: Fields>(entities: &'a [E], options: &FindOptions) -> Vec<&'a E> {
    let matching = entities
        .iter()
        .filter(|e| evaluate(*e, options.filter.as_ref()))
        .skip(options.offset);
    match options.limit {
        Some(limit) => matching.take(limit).collect(),
        None => matching.collect(),
    }
}
