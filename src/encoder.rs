//! One-hot feature encoding against a schema fixed at training time.
//!
//! The schema owns the column order. A row is always produced by looking each
//! value up by name in its block, so the model never sees a column in the
//! wrong position. A category the schema has never seen contributes nothing
//! to its block and is logged.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2};

use crate::io::ProjectRecord;

/// The attributes of one project a prediction is made from.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionInput {
    pub province: String,
    pub grade: String,
    pub land_shape: String,
    pub area_sqm: f64,
}

impl PredictionInput {
    pub fn from_record(r: &ProjectRecord) -> Self {
        Self {
            province: r.province.clone(),
            grade: r.grade.clone(),
            land_shape: r.land_shape.clone(),
            area_sqm: r.project_area_sqm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Province,
    Grade,
    LandShape,
}

impl Category {
    const ALL: [Category; 3] = [Category::Province, Category::Grade, Category::LandShape];

    fn prefix(self) -> &'static str {
        match self {
            Category::Province => "province",
            Category::Grade => "grade",
            Category::LandShape => "land_shape",
        }
    }

    fn value(self, input: &PredictionInput) -> &str {
        match self {
            Category::Province => &input.province,
            Category::Grade => &input.grade,
            Category::LandShape => &input.land_shape,
        }
    }
}

/// A categorical value with no column in the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct UnseenCategory {
    pub category: Category,
    pub value: String,
}

pub const AREA_COLUMN: &str = "project_area_sqm";

#[derive(Debug, Clone)]
pub struct FeatureSchema {
    /// Sorted known values for each category block, in `Category::ALL` order.
    blocks: [Vec<String>; 3],
    columns: Vec<String>,
}

impl FeatureSchema {
    /// Collects the category values seen in training. Columns are the area
    /// followed by the province, grade and land-shape indicators, each block sorted.
    pub fn fit<'a>(inputs: impl IntoIterator<Item = &'a PredictionInput>) -> Self {
        let mut seen: [BTreeSet<String>; 3] = Default::default();
        for input in inputs {
            for (set, cat) in seen.iter_mut().zip(Category::ALL) {
                set.insert(cat.value(input).to_string());
            }
        }
        let blocks = seen.map(|set| set.into_iter().collect::<Vec<_>>());

        let mut columns = vec![AREA_COLUMN.to_string()];
        for (values, cat) in blocks.iter().zip(Category::ALL) {
            columns.extend(values.iter().map(|v| format!("{}_{v}", cat.prefix())));
        }

        Self { blocks, columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encodes a row and reports the categories it could not place.
    pub fn encode_checked(&self, input: &PredictionInput) -> (Array1<f64>, Vec<UnseenCategory>) {
        let mut row = Array1::zeros(self.width());
        let mut unseen = Vec::new();
        row[0] = input.area_sqm;

        let mut offset = 1;
        for (values, cat) in self.blocks.iter().zip(Category::ALL) {
            let value = cat.value(input);
            match values.binary_search_by(|v| v.as_str().cmp(value)) {
                Ok(pos) => row[offset + pos] = 1.0,
                Err(_) => unseen.push(UnseenCategory {
                    category: cat,
                    value: value.to_string(),
                }),
            }
            offset += values.len();
        }
        (row, unseen)
    }

    /// Encodes a row, logging any category that falls outside the schema.
    pub fn encode(&self, input: &PredictionInput) -> Array1<f64> {
        let (row, unseen) = self.encode_checked(input);
        for miss in &unseen {
            log::warn!(
                "Unseen {} {:?}: encoded as all-zero indicators",
                miss.category.prefix(),
                miss.value
            );
        }
        row
    }

    pub fn encode_all<'a>(&self, inputs: impl IntoIterator<Item = &'a PredictionInput>) -> Array2<f64> {
        let rows: Vec<Array1<f64>> = inputs.into_iter().map(|i| self.encode(i)).collect();
        let mut x = Array2::zeros((rows.len(), self.width()));
        for (mut dst, src) in x.rows_mut().into_iter().zip(&rows) {
            dst.assign(src);
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(province: &str, grade: &str, shape: &str, area: f64) -> PredictionInput {
        PredictionInput {
            province: province.into(),
            grade: grade.into(),
            land_shape: shape.into(),
            area_sqm: area,
        }
    }

    #[test]
    fn columns_are_area_then_sorted_blocks() {
        let inputs = [
            input("Rayong", "PRIMO", "square", 1.0),
            input("Bangkok", "ELITE", "long", 2.0),
        ];
        let schema = FeatureSchema::fit(&inputs);
        assert_eq!(
            schema.columns().to_vec(),
            vec![
                "project_area_sqm",
                "province_Bangkok",
                "province_Rayong",
                "grade_ELITE",
                "grade_PRIMO",
                "land_shape_long",
                "land_shape_square",
            ]
        );
    }

    #[test]
    fn encodes_by_name_not_input_order() {
        let inputs = [
            input("Rayong", "PRIMO", "square", 1.0),
            input("Bangkok", "ELITE", "long", 2.0),
        ];
        let schema = FeatureSchema::fit(&inputs);
        let row = schema.encode(&input("Rayong", "ELITE", "square", 3200.0));
        assert_eq!(row.to_vec(), vec![3200.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn unseen_province_zero_fills_its_block() {
        let inputs = [input("Rayong", "PRIMO", "square", 1.0)];
        let schema = FeatureSchema::fit(&inputs);
        let (row, unseen) = schema.encode_checked(&input("Chiang Mai", "PRIMO", "square", 10.0));
        assert_eq!(row.to_vec(), vec![10.0, 0.0, 1.0, 1.0]);
        assert_eq!(
            unseen,
            vec![UnseenCategory {
                category: Category::Province,
                value: "Chiang Mai".into()
            }]
        );
    }
}
