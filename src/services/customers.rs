//! Customer migration.

use serde_json::json;

use crate::concurrency::run_bounded;
use crate::context::MigrationContext;
use crate::error::AppError;
use crate::models::{NewAddress, NewCustomer, ResourceKind, SourceAddress, SourceCustomer};

/// Migrates every source customer under the bounded scheduler.
pub async fn migrate_customers(ctx: &MigrationContext) -> Result<(), AppError> {
    let source = ctx.source.clone();
    let customers = ctx
        .retry()
        .run("fetch customers", || source.customers())
        .await?;
    ctx.reporter.touch(ResourceKind::Customers);
    tracing::info!(customers = customers.len(), "migrating customers");

    let keys: Vec<String> = customers
        .iter()
        .map(|c| normalized_email(c).unwrap_or_else(|| c.entity_id.to_string()))
        .collect();
    let outcomes = run_bounded(customers, ctx.concurrency(), |customer| {
        migrate_customer(ctx, customer)
    })
    .await;

    for outcome in outcomes {
        if let Err(err) = outcome.result {
            ctx.reporter
                .failed(ResourceKind::Customers, &keys[outcome.index], &err);
        }
    }
    Ok(())
}

/// Creates one customer and its address book.
///
/// An existing customer keeps its record; only addresses it does not have
/// yet are added, so a run cut short between the customer and its
/// addresses is completed by the next one.
pub async fn migrate_customer(
    ctx: &MigrationContext,
    customer: SourceCustomer,
) -> Result<(), AppError> {
    let email = normalized_email(&customer).ok_or_else(|| {
        AppError::Validation(format!("customer {} has no email", customer.entity_id))
    })?;
    let payload = customer_payload(&customer, &email);
    let backend = &ctx.backend;

    let upserted = ctx
        .resolver
        .upsert(
            &format!("customer:{}", email),
            || backend.find_customer_by_email(&email),
            || backend.create_customer(&payload),
        )
        .await?;
    let created = upserted.is_created();
    let target = upserted.into_inner();
    ctx.mappings
        .insert(ResourceKind::Customers, customer.entity_id, &target.id);

    // Twins sharing an email must not both add the same address.
    let _guard = ctx.resolver.hold(&format!("addresses:{}", email)).await;
    let retry = ctx.retry();
    let stored = if created {
        Vec::new()
    } else {
        retry
            .run(&format!("list addresses of {}", email), || {
                backend.list_customer_addresses(&target.id)
            })
            .await?
    };

    let mut added = 0;
    for (i, address) in customer.addresses.iter().enumerate() {
        let address = address_payload(address);
        if stored.iter().any(|s| address.same_place(s)) {
            continue;
        }
        let result = retry
            .run(&format!("create address {} of {}", i + 1, email), || {
                backend.create_customer_address(&target.id, &address)
            })
            .await;
        match result {
            Ok(()) => added += 1,
            Err(err) => ctx.reporter.warning(
                ResourceKind::Customers,
                &email,
                format!("address {} not created: {}", i + 1, err),
            ),
        }
    }

    if created {
        ctx.reporter
            .created(ResourceKind::Customers, &email, &target.id);
    } else if added > 0 {
        tracing::debug!(email = %email, added, "completed address book");
        ctx.reporter
            .updated(ResourceKind::Customers, &email, &target.id);
    } else {
        ctx.reporter
            .skipped(ResourceKind::Customers, &email, "already exists");
    }
    Ok(())
}

fn normalized_email(customer: &SourceCustomer) -> Option<String> {
    customer
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

fn customer_payload(customer: &SourceCustomer, email: &str) -> NewCustomer {
    let phone = customer
        .telephone
        .clone()
        .or_else(|| customer.addresses.iter().find_map(|a| a.telephone.clone()));
    NewCustomer {
        email: email.to_string(),
        first_name: customer.firstname.clone(),
        last_name: customer.lastname.clone(),
        phone,
        metadata: json!({
            "source_id": customer.entity_id,
            "source_created_at": customer.created_at,
        }),
    }
}

fn address_payload(address: &SourceAddress) -> NewAddress {
    let mut street = address
        .street
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    let address_1 = street.next().map(str::to_string);
    let rest: Vec<&str> = street.collect();

    NewAddress {
        first_name: address.firstname.clone(),
        last_name: address.lastname.clone(),
        company: address.company.clone(),
        address_1,
        address_2: (!rest.is_empty()).then(|| rest.join(", ")),
        city: address.city.clone(),
        province: address.region.clone(),
        postal_code: address.postcode.clone(),
        country_code: address.country_id.as_deref().map(str::to_lowercase),
        phone: address.telephone.clone(),
        is_default_billing: address.default_billing,
        is_default_shipping: address.default_shipping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(email: Option<&str>) -> SourceCustomer {
        SourceCustomer {
            entity_id: 42,
            email: email.map(str::to_string),
            firstname: Some("Ada".into()),
            lastname: Some("Lovelace".into()),
            telephone: None,
            created_at: Some("2020-01-01 00:00:00".into()),
            addresses: vec![SourceAddress {
                street: vec![
                    "1 Main St".into(),
                    "Floor 2".into(),
                    " ".into(),
                    "Suite 5".into(),
                ],
                country_id: Some("GB".into()),
                telephone: Some("+44 20 0000".into()),
                default_billing: true,
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_email_is_normalized() {
        assert_eq!(
            normalized_email(&customer(Some("  Ada@Example.COM "))).as_deref(),
            Some("ada@example.com")
        );
        assert_eq!(normalized_email(&customer(Some("  "))), None);
        assert_eq!(normalized_email(&customer(None)), None);
    }

    #[test]
    fn test_customer_phone_falls_back_to_address() {
        let c = customer(Some("ada@example.com"));
        let payload = customer_payload(&c, "ada@example.com");
        assert_eq!(payload.phone.as_deref(), Some("+44 20 0000"));
        assert_eq!(payload.metadata["source_id"], 42);
    }

    #[test]
    fn test_address_street_lines() {
        let c = customer(Some("ada@example.com"));
        let address = address_payload(&c.addresses[0]);
        assert_eq!(address.address_1.as_deref(), Some("1 Main St"));
        assert_eq!(address.address_2.as_deref(), Some("Floor 2, Suite 5"));
        assert_eq!(address.country_code.as_deref(), Some("gb"));
        assert!(address.is_default_billing);
        assert!(!address.is_default_shipping);
    }
}
