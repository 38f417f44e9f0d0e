//! Translation from doccrud predicates and updates to MongoDB syntax.
//!
//! This module translates doccrud's store-neutral query expressions and update specs into
//! MongoDB BSON documents for execution by the MongoDB query engine.

use std::collections::BTreeMap;

use bson::{Bson, Document, doc};

use doccrud_core::{
    backend::UpdateSpec,
    error::CrudError,
    planner::ID_FIELD,
    query::{Expr, FieldOp, Projection, QueryVisitor, Sort},
};

/// Translates doccrud query expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// The filter document for an optional predicate; `None` matches everything.
    pub fn filter(expr: Option<&Expr>) -> Result<Document, CrudError> {
        match expr {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = CrudError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::In => doc! { "$in": value },
                FieldOp::Nin => doc! { "$nin": value },
                FieldOp::Regex => match value {
                    Bson::String(pattern) => doc! { "$regex": pattern },
                    _ => return Err(CrudError::Backend(format!("regex operator on {field} requires a string pattern"))),
                },
            }
        })
    }

    /// MongoDB searches the collection's text index, whatever field the caller named.
    fn visit_text(&mut self, _field: &str, search: &str) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$text": { "$search": search },
        })
    }
}

/// Sort document preserving key order.
pub(crate) fn sort_document(sort: &[Sort]) -> Document {
    sort.iter()
        .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
        .collect()
}

/// Projection document, or `None` when every field is returned.
pub(crate) fn projection_document(projection: &Projection) -> Option<Document> {
    match projection {
        Projection::Exclude(fields) if fields.is_empty() => None,
        Projection::Exclude(fields) => Some(fields.iter().map(|field| (field.clone(), Bson::Int32(0))).collect()),
        Projection::Include(fields) => {
            let mut document: Document = fields.iter().map(|field| (field.clone(), Bson::Int32(1))).collect();

            if !fields.contains(ID_FIELD) {
                document.insert(ID_FIELD, 0);
            }

            Some(document)
        }
    }
}

/// Update document with `$set`, `$addToSet` and `$pull` operators.
pub(crate) fn update_document(update: &UpdateSpec) -> Document {
    let mut document = Document::new();

    if !update.set.is_empty() {
        document.insert("$set", update.set.clone());
    }

    if !update.add_to_set.is_empty() {
        let added: Document = group(&update.add_to_set)
            .into_iter()
            .map(|(field, values)| (field, Bson::Document(doc! { "$each": values })))
            .collect();
        document.insert("$addToSet", added);
    }

    if !update.pull.is_empty() {
        let pulled: Document = group(&update.pull)
            .into_iter()
            .map(|(field, values)| (field, Bson::Document(doc! { "$in": values })))
            .collect();
        document.insert("$pull", pulled);
    }

    document
}

fn group(pairs: &[(String, Bson)]) -> BTreeMap<String, Vec<Bson>> {
    let mut grouped: BTreeMap<String, Vec<Bson>> = BTreeMap::new();

    for (field, value) in pairs {
        grouped.entry(field.clone()).or_default().push(value.clone());
    }

    grouped
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;
    use doccrud_core::query::Predicate;

    use super::*;

    #[test]
    fn translates_nested_predicates() {
        let creator = ObjectId::new();
        let expr = Predicate::eq("creatorId", creator)
            .and(Predicate::gte("location.lat", 45.0))
            .and(Expr::Text { field: "title".to_string(), search: "tower".to_string() });

        let filter = MongoQueryTranslator::filter(Some(&expr)).unwrap();

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "creatorId": { "$eq": creator } },
                    { "location.lat": { "$gte": 45.0 } },
                    { "$text": { "$search": "tower" } },
                ]
            },
        );
    }

    #[test]
    fn include_projection_hides_id_unless_listed() {
        let projection = Projection::Include(["title".to_string()].into());

        assert_eq!(projection_document(&projection), Some(doc! { "title": 1, "_id": 0 }));
        assert_eq!(projection_document(&Projection::default()), None);
    }

    #[test]
    fn update_groups_array_operators_per_field() {
        let place = ObjectId::new();
        let update = UpdateSpec::new()
            .set("name", "alice")
            .add_to_set("places", place)
            .pull("places", place);

        assert_eq!(
            update_document(&update),
            doc! {
                "$set": { "name": "alice" },
                "$addToSet": { "places": { "$each": [place] } },
                "$pull": { "places": { "$in": [place] } },
            },
        );
    }
}
