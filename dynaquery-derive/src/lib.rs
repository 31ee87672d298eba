//! `#[derive(Entity)]`: the compile-time stand-in for the "reflective"
//! annotation processing of §4.A. Piggybacks on
//! `serde`'s `#[serde(rename = "...")]` for wire-attribute-name overrides
//! exactly as `modyne_derive::EntityDef` does, and introduces its own
//! `#[entity(...)]` struct/field attributes for everything `serde` has no
//! opinion about (key roles, index membership, converters, versioning).
//!
//! Shape violations that can be checked from the annotations alone (no
//! partition key, two partition keys, two sort keys, an index role on a
//! non-scalar field) are reported as `compile_error!` here; violations that
//! require the fully assembled descriptor (attribute-name collisions
//! within one index) are left to `dynaquery::metadata::validate`, which
//! runs once per type in `Registry::describe`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitStr, Type};

#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

struct FieldInfo {
    ident: syn::Ident,
    ty: Type,
    property: String,
    attribute: String,
    is_partition_key: bool,
    is_sort_key: bool,
    is_version: bool,
    is_composite_id: bool,
    converter: Option<syn::Path>,
    logical_type_override: Option<String>,
    /// `(index_name, role)`, `role` one of `"hash"`/`"range"`.
    indexes: Vec<(String, String)>,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_ident = &input.ident;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Entity can only be derived for structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Entity can only be derived for structs")),
    };

    let mut table_name: Option<String> = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                table_name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unrecognized entity attribute; expected `table`"))
            }
        })?;
    }

    let mut fields = Vec::new();
    for field in named {
        fields.push(parse_field(field)?);
    }

    let partition_keys: Vec<&FieldInfo> = fields.iter().filter(|f| f.is_partition_key).collect();
    if partition_keys.len() != 1 {
        return Err(syn::Error::new_spanned(
            struct_ident,
            format!(
                "exactly one field must be marked #[entity(partition_key)], found {}",
                partition_keys.len()
            ),
        ));
    }
    let partition_key = partition_keys[0];

    let sort_keys: Vec<&FieldInfo> = fields.iter().filter(|f| f.is_sort_key).collect();
    if sort_keys.len() > 1 {
        return Err(syn::Error::new_spanned(
            struct_ident,
            "at most one field may be marked #[entity(sort_key)]",
        ));
    }
    if let (Some(pk), Some(sk)) = (partition_keys.first(), sort_keys.first()) {
        if pk.property == sk.property {
            return Err(syn::Error::new_spanned(
                struct_ident,
                "sort key must be a field distinct from the partition key",
            ));
        }
    }

    let version_fields: Vec<&FieldInfo> = fields.iter().filter(|f| f.is_version).collect();
    if version_fields.len() > 1 {
        return Err(syn::Error::new_spanned(
            struct_ident,
            "at most one field may be marked #[entity(version)]",
        ));
    }

    let composite_id_fields: Vec<&FieldInfo> = fields.iter().filter(|f| f.is_composite_id).collect();
    if composite_id_fields.len() > 1 {
        return Err(syn::Error::new_spanned(
            struct_ident,
            "at most one field may be marked #[entity(composite_id)]",
        ));
    }

    for field in &fields {
        if !field.indexes.is_empty() && !is_scalar_type(&field.ty) {
            return Err(syn::Error::new_spanned(
                &field.ident,
                "an index role can only be declared on a scalar-typed property (String, number, bool, bytes, or a timestamp)",
            ));
        }
        for (_, role) in &field.indexes {
            if role != "hash" && role != "range" {
                return Err(syn::Error::new_spanned(
                    &field.ident,
                    format!("index role must be \"hash\" or \"range\", found {role:?}"),
                ));
            }
        }
    }

    let property_tokens: Vec<TokenStream2> = fields.iter().map(property_ref_tokens).collect();
    let partition_key_tokens = property_ref_tokens(partition_key);
    let sort_key_tokens = match sort_keys.first() {
        Some(sk) => {
            let tokens = property_ref_tokens(sk);
            quote! { Some(#tokens) }
        }
        None => quote! { None },
    };
    let version_property_tokens = match version_fields.first() {
        Some(v) => {
            let tokens = property_ref_tokens(v);
            quote! { Some(#tokens) }
        }
        None => quote! { None },
    };

    let attribute_entries: Vec<TokenStream2> = fields
        .iter()
        .map(|f| {
            let property = &f.property;
            let attribute = &f.attribute;
            quote! { (#property, #attribute) }
        })
        .collect();

    let converter_entries: Vec<TokenStream2> = fields
        .iter()
        .filter_map(|f| {
            let path = f.converter.as_ref()?;
            let property = &f.property;
            let type_name = quote!(#path).to_string();
            Some(quote! {
                (#property, ::dynaquery::metadata::ConverterHandle {
                    type_name: #type_name,
                    factory: || ::std::boxed::Box::new(<#path as ::std::default::Default>::default())
                        as ::std::boxed::Box<dyn ::dynaquery::metadata::ValueConverter>,
                })
            })
        })
        .collect();

    let mut index_by_property: Vec<TokenStream2> = Vec::new();
    let mut hash_key_properties: Vec<TokenStream2> = Vec::new();
    let mut range_key_properties: Vec<TokenStream2> = Vec::new();
    for field in &fields {
        if field.indexes.is_empty() {
            continue;
        }
        let property = &field.property;
        let names: Vec<&str> = field.indexes.iter().map(|(name, _)| name.as_str()).collect();
        index_by_property.push(quote! { (#property, vec![#(#names),*]) });
        if field.indexes.iter().any(|(_, role)| role == "hash") {
            hash_key_properties.push(quote! { #property });
        }
        if field.indexes.iter().any(|(_, role)| role == "range") {
            range_key_properties.push(quote! { #property });
        }
    }

    let composite_id_tokens = match composite_id_fields.first() {
        Some(field) => {
            let property = &field.property;
            let ty = &field.ty;
            quote! {
                Some(::dynaquery::metadata::CompositeIdSpec {
                    property: #property,
                    factory: || ::std::boxed::Box::new(<#ty as ::std::default::Default>::default())
                        as ::std::boxed::Box<dyn ::dynaquery::metadata::CompositeKey>,
                })
            }
        }
        None => quote! { None },
    };

    let entity_name = struct_ident.to_string();
    let table_name_tokens = match &table_name {
        Some(name) => quote! { Some(#name) },
        None => quote! { None },
    };

    let expanded = quote! {
        impl ::dynaquery::metadata::Entity for #struct_ident {
            fn describe() -> ::dynaquery::metadata::EntityDescriptor {
                ::dynaquery::metadata::EntityDescriptor {
                    name: #entity_name,
                    table_name: #table_name_tokens,
                    partition_key: #partition_key_tokens,
                    sort_key: #sort_key_tokens,
                    properties: vec![#(#property_tokens),*],
                    attribute_name_by_property: [#(#attribute_entries),*].into_iter().collect(),
                    converter_by_property: [#(#converter_entries),*].into_iter().collect(),
                    indexes_by_property: [#(#index_by_property),*].into_iter().collect(),
                    index_hash_key_properties: [#(#hash_key_properties),*].into_iter().collect(),
                    index_range_key_properties: [#(#range_key_properties),*].into_iter().collect(),
                    version_property: #version_property_tokens,
                    composite_id: #composite_id_tokens,
                }
            }
        }
    };

    Ok(expanded)
}

fn parse_field(field: &syn::Field) -> syn::Result<FieldInfo> {
    let ident = field.ident.clone().expect("named field");
    let property = ident.to_string();
    let mut attribute = property.clone();
    let mut is_partition_key = false;
    let mut is_sort_key = false;
    let mut is_version = false;
    let mut is_composite_id = false;
    let mut converter = None;
    let mut logical_type_override = None;
    let mut indexes = Vec::new();

    for attr in &field.attrs {
        if attr.path().is_ident("serde") {
            // We only care about `rename`; ignore every other serde
            // attribute (`default`, `skip_serializing_if`, ...) rather
            // than rejecting them.
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    attribute = value.value();
                } else if meta.input.peek(syn::Token![=]) {
                    let _: syn::Expr = meta.value()?.parse()?;
                }
                Ok(())
            });
            continue;
        }

        if !attr.path().is_ident("entity") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("partition_key") {
                is_partition_key = true;
                Ok(())
            } else if meta.path.is_ident("sort_key") {
                is_sort_key = true;
                Ok(())
            } else if meta.path.is_ident("version") {
                is_version = true;
                Ok(())
            } else if meta.path.is_ident("composite_id") {
                is_composite_id = true;
                Ok(())
            } else if meta.path.is_ident("converter") {
                let value: LitStr = meta.value()?.parse()?;
                converter = Some(syn::parse_str::<syn::Path>(&value.value())?);
                Ok(())
            } else if meta.path.is_ident("logical_type") {
                let value: LitStr = meta.value()?.parse()?;
                logical_type_override = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("index") {
                let mut name = None;
                let mut role = None;
                meta.parse_nested_meta(|inner| {
                    if inner.path.is_ident("name") {
                        let value: LitStr = inner.value()?.parse()?;
                        name = Some(value.value());
                        Ok(())
                    } else if inner.path.is_ident("role") {
                        let value: LitStr = inner.value()?.parse()?;
                        role = Some(value.value());
                        Ok(())
                    } else {
                        Err(inner.error("expected `name` or `role`"))
                    }
                })?;
                let name = name.ok_or_else(|| meta.error("index requires name = \"...\""))?;
                let role = role.ok_or_else(|| meta.error("index requires role = \"hash\" or \"range\""))?;
                indexes.push((name, role));
                Ok(())
            } else {
                Err(meta.error("unrecognized entity attribute"))
            }
        })?;
    }

    Ok(FieldInfo {
        ident,
        ty: field.ty.clone(),
        property,
        attribute,
        is_partition_key,
        is_sort_key,
        is_version,
        is_composite_id,
        converter,
        logical_type_override,
        indexes,
    })
}

fn property_ref_tokens(field: &FieldInfo) -> TokenStream2 {
    let property = &field.property;
    let attribute = &field.attribute;
    let logical_type = logical_type_tokens(field);
    quote! {
        ::dynaquery::metadata::PropertyRef {
            property: #property,
            attribute: #attribute,
            logical_type: #logical_type,
        }
    }
}

/// Strips an `Option<...>` wrapper so `Option<String>` infers the same
/// logical type as `String` — DynamoDB has no null-vs-absent distinction
/// this crate needs to track separately at the metadata level.
fn innermost_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

fn type_name(ty: &Type) -> String {
    quote!(#ty).to_string().replace(' ', "")
}

fn is_scalar_type(ty: &Type) -> bool {
    matches!(
        type_name(innermost_type(ty)).as_str(),
        "String"
            | "str"
            | "bool"
            | "i8" | "i16" | "i32" | "i64" | "i128" | "isize"
            | "u8" | "u16" | "u32" | "u64" | "u128" | "usize"
            | "f32" | "f64"
            | "Vec<u8>"
            | "chrono::DateTime<chrono::Utc>"
            | "DateTime<Utc>"
            | "chrono::DateTime<Utc>"
    )
}

/// The logical-type inference table: an explicit `#[entity(logical_type =
/// "...")]` always wins (needed to disambiguate `Instant` vs. `Date`, which
/// share the same Rust representation, `chrono::DateTime<Utc>`); otherwise
/// the field's own type is matched against the known scalar shapes, and
/// anything unrecognized becomes `Other` (requires a `converter`, checked
/// at runtime by the marshaller rather than here, since a field can be
/// `Other` on purpose when it only ever reaches the wire through a
/// converter).
fn logical_type_tokens(field: &FieldInfo) -> TokenStream2 {
    let tag = field
        .logical_type_override
        .clone()
        .or_else(|| infer_logical_type(&field.ty).map(str::to_string));

    match tag.as_deref() {
        Some("string") => quote!(::dynaquery::metadata::LogicalType::String),
        Some("integer") => quote!(::dynaquery::metadata::LogicalType::Integer),
        Some("floating") => quote!(::dynaquery::metadata::LogicalType::Floating),
        Some("boolean") => quote!(::dynaquery::metadata::LogicalType::Boolean),
        Some("instant") => quote!(::dynaquery::metadata::LogicalType::Instant),
        Some("date") => quote!(::dynaquery::metadata::LogicalType::Date),
        Some("bytes") => quote!(::dynaquery::metadata::LogicalType::Bytes),
        _ => quote!(::dynaquery::metadata::LogicalType::Other),
    }
}

fn infer_logical_type(ty: &Type) -> Option<&'static str> {
    match type_name(innermost_type(ty)).as_str() {
        "String" | "str" => Some("string"),
        "bool" => Some("boolean"),
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => {
            Some("integer")
        }
        "f32" | "f64" => Some("floating"),
        "Vec<u8>" => Some("bytes"),
        "chrono::DateTime<chrono::Utc>" | "DateTime<Utc>" => Some("instant"),
        _ => None,
    }
}
