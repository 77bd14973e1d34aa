//! Product lookups backing the `BenefitPlanID` reference

use libsql::Connection;

use crate::db::{DatabaseError, DatabaseService};
use crate::models::Product;

impl DatabaseService {
    /// Insert a product and return its generated `ProdID`
    pub async fn db_insert_product(
        &self,
        code: &str,
        name: &str,
        insurance_period: Option<i64>,
    ) -> Result<Product, DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        conn.execute(
            "INSERT INTO tblProduct (ProductCode, ProductName, InsurancePeriod) VALUES (?, ?, ?)",
            (code, name, insurance_period),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert product: {}", e)))?;

        Ok(Product {
            id: conn.last_insert_rowid(),
            code: code.to_string(),
            name: name.to_string(),
            insurance_period,
        })
    }

    /// Fetch a product by id on the given connection
    pub async fn db_get_product(
        &self,
        conn: &Connection,
        id: i64,
    ) -> Result<Option<Product>, DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT ProdID, ProductCode, ProductName, InsurancePeriod FROM tblProduct WHERE ProdID = ?",
                [id],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query product: {}", e)))?;

        match rows.next().await? {
            Some(row) => Ok(Some(Product {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                insurance_period: row.get(3)?,
            })),
            None => Ok(None),
        }
    }
}
