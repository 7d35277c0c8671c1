use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, Put, ReturnValue, TransactWriteItem};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_attribute_value, to_item};
use serde_json::Value;

use super::{Condition, Document, Key, Page, Store, StoreError, Update, GSI1PK, GSI1_NAME};

type Item = HashMap<String, AttributeValue>;

/// [`Store`] backed by one DynamoDB table with a `GSI1` index on `GSI1PK`
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn backend<E: std::fmt::Debug>(err: E) -> StoreError {
    StoreError::Backend(format!("{:?}", err))
}

fn encode(doc: Document) -> Result<Item, StoreError> {
    to_item(Value::Object(doc)).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(item: Item) -> Result<Document, StoreError> {
    let value: Value = from_item(item).map_err(|e| StoreError::Codec(e.to_string()))?;
    match value {
        Value::Object(doc) => Ok(doc),
        _ => Err(StoreError::Codec("item is not a map".to_string())),
    }
}

fn key_item(key: &Key) -> Item {
    HashMap::from([
        ("PK".to_string(), AttributeValue::S(key.pk.clone())),
        ("SK".to_string(), AttributeValue::S(key.sk.clone())),
    ])
}

fn condition_expression(condition: Condition) -> Option<&'static str> {
    match condition {
        Condition::Always => None,
        Condition::NotExists => Some("attribute_not_exists(PK)"),
        Condition::Exists => Some("attribute_exists(PK)"),
    }
}

/// Update expression with its placeholder maps
#[derive(Debug)]
pub(crate) struct Rendered {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, Value>,
}

fn placeholder(path: &str, names: &mut HashMap<String, String>) -> String {
    path.split('.')
        .map(|segment| {
            let existing = names
                .iter()
                .find(|(_, name)| name.as_str() == segment)
                .map(|(k, _)| k.clone());
            existing.unwrap_or_else(|| {
                let k = format!("#n{}", names.len());
                names.insert(k.clone(), segment.to_string());
                k
            })
        })
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn render(update: &Update) -> Rendered {
    let mut names: HashMap<String, String> = HashMap::new();
    let mut values = HashMap::new();

    let mut set_clauses = Vec::new();
    for (i, (path, value)) in update.sets.iter().enumerate() {
        let p = placeholder(path, &mut names);
        let v = format!(":s{}", i);
        set_clauses.push(format!("{} = {}", p, v));
        values.insert(v, value.clone());
    }
    for (i, (path, delta)) in update.increments.iter().enumerate() {
        let p = placeholder(path, &mut names);
        let v = format!(":d{}", i);
        set_clauses.push(format!("{} = if_not_exists({}, :zero) + {}", p, p, v));
        values.insert(v, Value::from(*delta));
        values.insert(":zero".to_string(), Value::from(0));
    }

    let remove_clauses: Vec<String> = update
        .removes
        .iter()
        .map(|path| placeholder(path, &mut names))
        .collect();

    let mut expression = String::new();
    if !set_clauses.is_empty() {
        expression.push_str(&format!("SET {}", set_clauses.join(", ")));
    }
    if !remove_clauses.is_empty() {
        if !expression.is_empty() {
            expression.push(' ');
        }
        expression.push_str(&format!("REMOVE {}", remove_clauses.join(", ")));
    }

    Rendered {
        expression,
        names,
        values,
    }
}

#[async_trait]
impl Store for DynamoStore {
    async fn get(&self, key: &Key) -> Result<Option<Document>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(key_item(key)))
            .send()
            .await
            .map_err(backend)?;

        result.item().cloned().map(decode).transpose()
    }

    async fn put(&self, item: Document, condition: Condition) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(encode(item)?));

        if let Some(expr) = condition_expression(condition) {
            request = request.condition_expression(expr);
        }

        request.send().await.map_err(|e| {
            let conditional = e
                .as_service_error()
                .map(|s| s.is_conditional_check_failed_exception())
                .unwrap_or(false);
            if conditional {
                StoreError::ConditionFailed
            } else {
                backend(e)
            }
        })?;
        Ok(())
    }

    async fn put_all(&self, items: Vec<(Document, Condition)>) -> Result<(), StoreError> {
        let mut writes = Vec::with_capacity(items.len());
        for (doc, condition) in items {
            let mut put = Put::builder()
                .table_name(&self.table_name)
                .set_item(Some(encode(doc)?));
            if let Some(expr) = condition_expression(condition) {
                put = put.condition_expression(expr);
            }
            writes.push(
                TransactWriteItem::builder()
                    .put(put.build().map_err(backend)?)
                    .build(),
            );
        }

        self.client
            .transact_write_items()
            .set_transact_items(Some(writes))
            .send()
            .await
            .map_err(|e| {
                let cancelled = e
                    .as_service_error()
                    .map(|s| s.is_transaction_canceled_exception())
                    .unwrap_or(false);
                if cancelled {
                    StoreError::ConditionFailed
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    async fn query(&self, pk: &str, sk_prefix: Option<&str>) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut start: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.table_name)
                .expression_attribute_values(":pk", AttributeValue::S(pk.to_string()))
                .set_exclusive_start_key(start.take());

            request = match sk_prefix {
                Some(prefix) => request
                    .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                    .expression_attribute_values(":sk_prefix", AttributeValue::S(prefix.to_string())),
                None => request.key_condition_expression("PK = :pk"),
            };

            let resp = request.send().await.map_err(backend)?;
            for item in resp.items() {
                documents.push(decode(item.clone())?);
            }

            match resp.last_evaluated_key() {
                Some(last) if !last.is_empty() => start = Some(last.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn query_index(&self, value: &str) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        let mut start: Option<Item> = None;

        loop {
            let resp = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(GSI1_NAME)
                .key_condition_expression("#gsi = :value")
                .expression_attribute_names("#gsi", GSI1PK)
                .expression_attribute_values(":value", AttributeValue::S(value.to_string()))
                .set_exclusive_start_key(start.take())
                .send()
                .await
                .map_err(backend)?;

            for item in resp.items() {
                documents.push(decode(item.clone())?);
            }

            match resp.last_evaluated_key() {
                Some(last) if !last.is_empty() => start = Some(last.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn scan(
        &self,
        pk_prefix: &str,
        limit: i32,
        start: Option<Key>,
    ) -> Result<Page, StoreError> {
        let resp = self
            .client
            .scan()
            .table_name(&self.table_name)
            .limit(limit)
            .filter_expression("begins_with(PK, :prefix)")
            .expression_attribute_values(":prefix", AttributeValue::S(pk_prefix.to_string()))
            .set_exclusive_start_key(start.as_ref().map(key_item))
            .send()
            .await
            .map_err(backend)?;

        let items = resp
            .items()
            .iter()
            .cloned()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;

        let last_key = match resp.last_evaluated_key() {
            Some(last) if !last.is_empty() => {
                let key: Key =
                    from_item(last.clone()).map_err(|e| StoreError::Codec(e.to_string()))?;
                Some(key)
            }
            _ => None,
        };

        Ok(Page { items, last_key })
    }

    async fn update(&self, update: Update) -> Result<Document, StoreError> {
        if update.is_empty() {
            return match self.get(&update.key).await? {
                Some(doc) => Ok(doc),
                None if update.condition == Condition::Exists => Err(StoreError::ConditionFailed),
                None => Ok(Document::new()),
            };
        }

        let rendered = render(&update);
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(key_item(&update.key)))
            .update_expression(rendered.expression)
            .return_values(ReturnValue::AllNew);

        for (k, v) in rendered.names {
            request = request.expression_attribute_names(k, v);
        }
        for (k, v) in rendered.values {
            let value = to_attribute_value(v).map_err(|e| StoreError::Codec(e.to_string()))?;
            request = request.expression_attribute_values(k, value);
        }
        if let Some(expr) = condition_expression(update.condition) {
            request = request.condition_expression(expr);
        }

        let resp = request.send().await.map_err(|e| {
            let conditional = e
                .as_service_error()
                .map(|s| s.is_conditional_check_failed_exception())
                .unwrap_or(false);
            if conditional {
                StoreError::ConditionFailed
            } else {
                backend(e)
            }
        })?;

        resp.attributes()
            .cloned()
            .map(decode)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    async fn delete(&self, key: &Key, condition: Condition) -> Result<(), StoreError> {
        let mut request = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(key_item(key)));

        if let Some(expr) = condition_expression(condition) {
            request = request.condition_expression(expr);
        }

        request.send().await.map_err(|e| {
            let conditional = e
                .as_service_error()
                .map(|s| s.is_conditional_check_failed_exception())
                .unwrap_or(false);
            if conditional {
                StoreError::ConditionFailed
            } else {
                backend(e)
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_set_increment_remove() {
        let update = Update::new(Key::new("USER#1", "PROFILE"))
            .set("authentication.lastFailedAt", "2025-01-01T00:00:00Z")
            .increment("authentication.loginAttempts", 1)
            .remove("authentication.lockedUntil");

        let rendered = render(&update);
        assert_eq!(
            rendered.expression,
            "SET #n0.#n1 = :s0, #n0.#n2 = if_not_exists(#n0.#n2, :zero) + :d0 REMOVE #n0.#n3"
        );
        assert_eq!(rendered.names["#n0"], "authentication");
        assert_eq!(rendered.names["#n3"], "lockedUntil");
        assert_eq!(rendered.values[":d0"], Value::from(1));
        assert_eq!(rendered.values[":zero"], Value::from(0));
    }

    #[test]
    fn test_render_remove_only() {
        let update = Update::new(Key::new("A", "B")).remove("lockedUntil");
        let rendered = render(&update);
        assert_eq!(rendered.expression, "REMOVE #n0");
        assert!(rendered.values.is_empty());
    }
}
