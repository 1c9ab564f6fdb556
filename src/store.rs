use crate::error::{FormError, LimitKind};
use crate::value::FormValue;
use log::debug;
use std::collections::{HashMap, VecDeque};

/// The decoded values of a form, by name
///
/// Names keep the order they were first added in, and each name keeps its values in the order they
/// were added. The total number of values across all names is capped: adding past the cap fails
/// instead of dropping anything.
///
/// Uploaded files stay on disk after parsing. Call [`FormData::delete_files`] when done with them.
#[derive(Debug)]
pub struct FormData {
    names: Vec<String>,
    values: HashMap<String, VecDeque<FormValue>>,
    count: usize,
    max_values: usize,
}

impl FormData {
    /// Construct an empty store holding at most `max_values` values
    pub fn new(max_values: usize) -> Self {
        FormData {
            names: Vec::new(),
            values: HashMap::new(),
            count: 0,
            max_values,
        }
    }

    /// Append a value under `name`
    pub fn add<I: Into<String>>(&mut self, name: I, value: FormValue) -> Result<(), FormError> {
        if self.count >= self.max_values {
            return Err(FormError::limit(LimitKind::Values, self.max_values));
        }

        let name = name.into();
        match self.values.get_mut(&name) {
            Some(values) => values.push_back(value),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, VecDeque::from([value]));
            }
        }

        self.count += 1;
        Ok(())
    }

    /// Replace every value under `name` with `value`.
    ///
    /// Replaced file values are returned so the caller can decide what happens to their content.
    pub fn put<I: Into<String>>(
        &mut self,
        name: I,
        value: FormValue,
    ) -> Result<VecDeque<FormValue>, FormError> {
        let name = name.into();
        let existing = self.values.get(&name).map_or(0, VecDeque::len);

        if self.count - existing >= self.max_values {
            return Err(FormError::limit(LimitKind::Values, self.max_values));
        }

        let replaced = match self.values.get_mut(&name) {
            Some(values) => std::mem::replace(values, VecDeque::from([value])),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, VecDeque::from([value]));
                VecDeque::new()
            }
        };

        self.count = self.count - existing + 1;
        Ok(replaced)
    }

    /// All values under `name`, in the order they were added
    pub fn get(&self, name: &str) -> Option<&VecDeque<FormValue>> {
        self.values.get(name)
    }

    /// Mutable access to the values under `name`
    pub fn get_mut(&mut self, name: &str) -> Option<&mut VecDeque<FormValue>> {
        self.values.get_mut(name)
    }

    pub fn get_first(&self, name: &str) -> Option<&FormValue> {
        self.values.get(name).and_then(VecDeque::front)
    }

    pub fn get_last(&self, name: &str) -> Option<&FormValue> {
        self.values.get(name).and_then(VecDeque::back)
    }

    /// Remove and return all values under `name`
    pub fn remove(&mut self, name: &str) -> Option<VecDeque<FormValue>> {
        let removed = self.values.remove(name)?;

        self.names.retain(|existing| existing != name);
        self.count -= removed.len();

        Some(removed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Names in the order they were first added
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Names and their values in the order the names were first added
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VecDeque<FormValue>)> {
        self.names
            .iter()
            .filter_map(|name| self.values.get(name).map(|values| (name.as_str(), values)))
    }

    /// Total number of values across all names
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn max_values(&self) -> usize {
        self.max_values
    }

    /// Remove every spool file this store refers to.
    ///
    /// This is best effort: failures are logged and the remaining files are still removed.
    pub fn delete_files(&self) {
        let mut deleted = 0;

        for item in self
            .values
            .values()
            .flatten()
            .filter_map(|value| value.file_item().ok())
            .filter(|item| !item.is_in_memory())
        {
            item.delete_logged();
            deleted += 1;
        }

        debug!("Deleted {deleted} spooled uploads");
    }

    /// Delete every spool file and drop the store
    pub fn discard(self) {
        self.delete_files();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FileItem;
    use http::HeaderMap;

    fn texts(store: &FormData, name: &str) -> Vec<String> {
        store
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .map(|value| value.value().unwrap().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn keeps_insertion_order() {
        let mut store = FormData::new(10);
        store.add("b", FormValue::text("1")).unwrap();
        store.add("a", FormValue::text("2")).unwrap();
        store.add("b", FormValue::text("3")).unwrap();

        assert_eq!(store.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(texts(&store, "b"), vec!["1", "3"]);
        assert_eq!(store.get_first("b").unwrap().value().unwrap(), "1");
        assert_eq!(store.get_last("b").unwrap().value().unwrap(), "3");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn add_fails_at_cap() {
        let mut store = FormData::new(2);
        store.add("a", FormValue::text("1")).unwrap();
        store.add("a", FormValue::text("2")).unwrap();

        let err = store.add("b", FormValue::text("3")).unwrap_err();
        assert_eq!(err.limit_kind(), Some(LimitKind::Values));
        assert_eq!(store.len(), 2);
        assert!(!store.contains("b"));
    }

    #[test]
    fn put_replaces_and_adjusts_count() {
        let mut store = FormData::new(3);
        store.add("a", FormValue::text("1")).unwrap();
        store.add("a", FormValue::text("2")).unwrap();
        store.add("b", FormValue::text("3")).unwrap();

        let replaced = store.put("a", FormValue::text("4")).unwrap();
        assert_eq!(replaced.len(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(texts(&store, "a"), vec!["4"]);

        store.put("c", FormValue::text("5")).unwrap();
        assert_eq!(store.len(), 3);

        let err = store.put("d", FormValue::text("6")).unwrap_err();
        assert_eq!(err.limit_kind(), Some(LimitKind::Values));

        // replacing at the cap is fine
        store.put("c", FormValue::text("7")).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn remove_updates_order_and_count() {
        let mut store = FormData::new(10);
        store.add("a", FormValue::text("1")).unwrap();
        store.add("b", FormValue::text("2")).unwrap();
        store.add("a", FormValue::text("3")).unwrap();

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        assert!(!store.contains("a"));
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["b"]);
        assert!(store.remove("a").is_none());

        let pairs: Vec<_> = store.iter().map(|(name, values)| (name, values.len())).collect();
        assert_eq!(pairs, vec![("b", 1)]);
    }

    #[test]
    fn delete_files_removes_spooled_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.tmp");
        std::fs::write(&path, b"data").unwrap();

        let mut store = FormData::new(10);
        store
            .add(
                "file",
                FormValue::file(
                    FileItem::Spooled {
                        path: path.clone(),
                        size: 4,
                    },
                    "a.txt",
                    HeaderMap::new(),
                ),
            )
            .unwrap();
        store.add("text", FormValue::text("x")).unwrap();

        store.discard();
        assert!(!path.exists());
    }
}
