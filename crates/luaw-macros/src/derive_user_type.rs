//! Implementation of the `#[derive(UserType)]` macro.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Index, Member, Type, parse_macro_input, spanned::Spanned};

use crate::attrs::{FieldAttrs, TypeAttrs};

pub fn derive_user_type_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_user_type_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_user_type_inner(input: &DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "UserType cannot be derived for generic types; implement it by hand per instantiation",
        ));
    }

    let name = &input.ident;
    let attrs = TypeAttrs::from_attrs(&input.attrs)?;
    let lua_name = attrs.name.clone().unwrap_or_else(|| name.to_string());

    let operators = &attrs.operators;
    let operators_fn = if operators.is_empty() {
        quote! {}
    } else {
        quote! {
            fn operators(ops: &mut ::luaw::OperatorSet<Self>) {
                #( ops.#operators(); )*
            }
        }
    };

    let inherits = generate_inherits(input)?;

    Ok(quote! {
        impl ::luaw::UserType for #name {
            const NAME: &'static str = #lua_name;

            #operators_fn
        }

        #inherits
    })
}

/// Generate `Inherits` from the field marked `#[luaw(parent)]`, if any.
fn generate_inherits(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let mut parent: Option<(Member, &Type)> = None;

    let fields = match &input.data {
        Data::Struct(data) => Some(&data.fields),
        _ => None,
    };

    if let Some(fields) = fields {
        let iter: Box<dyn Iterator<Item = &syn::Field>> = match fields {
            Fields::Named(named) => Box::new(named.named.iter()),
            Fields::Unnamed(unnamed) => Box::new(unnamed.unnamed.iter()),
            Fields::Unit => Box::new(std::iter::empty()),
        };

        for (position, field) in iter.enumerate() {
            if !FieldAttrs::from_attrs(&field.attrs)?.parent {
                continue;
            }
            if parent.is_some() {
                return Err(syn::Error::new(
                    field.span(),
                    "only one field can be marked #[luaw(parent)]",
                ));
            }
            let member = match &field.ident {
                Some(ident) => Member::Named(ident.clone()),
                None => Member::Unnamed(Index::from(position)),
            };
            parent = Some((member, &field.ty));
        }
    } else {
        // Enums and unions cannot carry a parent field, but reject a stray marker.
        if let Data::Enum(data) = &input.data {
            for variant in &data.variants {
                for field in &variant.fields {
                    if FieldAttrs::from_attrs(&field.attrs)?.parent {
                        return Err(syn::Error::new(
                            field.span(),
                            "#[luaw(parent)] is only supported on struct fields",
                        ));
                    }
                }
            }
        }
    }

    let Some((member, parent_ty)) = parent else {
        return Ok(quote! {});
    };

    let name = &input.ident;
    Ok(quote! {
        impl ::luaw::Inherits for #name {
            type Parent = #parent_ty;

            fn upcast(&self) -> &#parent_ty {
                &self.#member
            }

            fn upcast_mut(&mut self) -> &mut #parent_ty {
                &mut self.#member
            }
        }
    })
}
